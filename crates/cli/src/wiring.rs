//! Construction of the concrete adapters and handlers from configuration.

use std::sync::Arc;

use anyhow::Context;
use batch::{ProcessJobDefinition, ProcessJobSubmitter};
use billing::{FileCostSource, HttpCostSource, DEFAULT_HTTP_TIMEOUT};
use listener::{Dispatcher, Senders};
use notify::{LogChannel, WebhookChannel, DEFAULT_WEBHOOK_TIMEOUT};
use pipeline::{
    AdmissionController, AlertChannel, ArrivalDeduplicator, BudgetMonitor, CostSource,
    EventRouter, InMemoryAdmissionStore, NotificationChannel, SubmissionGateway,
};
use store::FileAdmissionStore;

use crate::config::{AdmissionConfig, BatchgateConfig, ChannelConfig, CostSourceConfig};

pub fn admission_controller(config: &BatchgateConfig) -> Arc<AdmissionController> {
    let controller = match &config.admission {
        AdmissionConfig::File { path } => AdmissionController::new(Arc::new(FileAdmissionStore::new(path))),
        AdmissionConfig::Memory => AdmissionController::new(Arc::new(InMemoryAdmissionStore::new())),
    };
    Arc::new(controller)
}

fn cost_source(config: &CostSourceConfig) -> anyhow::Result<Arc<dyn CostSource>> {
    Ok(match config {
        CostSourceConfig::File { path } => Arc::new(FileCostSource::new(path)),
        CostSourceConfig::Http { url } => Arc::new(
            HttpCostSource::new(url.clone(), DEFAULT_HTTP_TIMEOUT)
                .context("building cost source client")?,
        ),
    })
}

fn notification_channel(config: &ChannelConfig) -> anyhow::Result<Arc<dyn NotificationChannel>> {
    Ok(match config {
        ChannelConfig::Log => Arc::new(LogChannel),
        ChannelConfig::Webhook { url } => Arc::new(
            WebhookChannel::new(url.clone(), DEFAULT_WEBHOOK_TIMEOUT)
                .context("building notification webhook client")?,
        ),
    })
}

fn alert_channel(config: &ChannelConfig) -> anyhow::Result<Arc<dyn AlertChannel>> {
    Ok(match config {
        ChannelConfig::Log => Arc::new(LogChannel),
        ChannelConfig::Webhook { url } => Arc::new(
            WebhookChannel::new(url.clone(), DEFAULT_WEBHOOK_TIMEOUT)
                .context("building alert webhook client")?,
        ),
    })
}

pub fn budget_monitor(
    config: &BatchgateConfig,
    admission: Arc<AdmissionController>,
) -> anyhow::Result<BudgetMonitor> {
    let alerts = config.notify.alerts.as_ref().unwrap_or(&config.notify.channel);
    Ok(BudgetMonitor::new(
        admission,
        cost_source(&config.budget.cost_source)?,
        alert_channel(alerts)?,
        config.ceiling()?,
    )
    .with_warn_percent(config.warn_percent()))
}

/// Builds the gateway, router and monitor around one shared admission gate.
/// Job status events from the process substrate are fed back into
/// `senders.statuses`.
pub fn dispatcher(config: &BatchgateConfig, senders: &Senders) -> anyhow::Result<Dispatcher> {
    let admission = admission_controller(config);
    let target = config.submission_target()?;

    let definition = ProcessJobDefinition {
        name: target.job_definition.clone(),
        program: config.job.program.clone(),
        args: config.job.args.clone(),
        attempts: config.job.attempts,
        attempt_timeout: config.job_timeout(),
    };
    let submitter = Arc::new(ProcessJobSubmitter::new(definition, senders.statuses.clone()));
    let dedup = ArrivalDeduplicator::new(config.dedup_window(), config.dedup.capacity);
    let gateway = SubmissionGateway::new(admission.clone(), submitter, target, dedup);

    let router = EventRouter::new(notification_channel(&config.notify.channel)?);
    let monitor = budget_monitor(config, admission)?;

    Ok(Dispatcher::new(
        Arc::new(gateway),
        Arc::new(router),
        Arc::new(monitor),
    )
    .with_max_in_flight(config.dispatch.max_in_flight))
}
