//! Budget monitor: compares spend against the ceiling and closes admission on
//! breach.
//!
//! Evaluation is a pure rule ([`evaluate`]); [`BudgetMonitor::run_cycle`]
//! wraps it with the cost-source read, the gate write, and the alerts. The
//! monitor never reopens the gate, even if later spend falls back below the
//! ceiling.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    AdmissionController, AdmissionStoreError, BudgetAlert, BudgetCeiling, CloseOutcome,
    CostSourceError, PublishError, Spend, Timestamp,
};

/// Default warning threshold, as a percentage of the ceiling.
pub const DEFAULT_WARN_PERCENT: f64 = 95.0;

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// Spend reported by the cost-accounting collaborator for the current period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendReport {
    pub period_start: Timestamp,
    pub accumulated_spend: Spend,
}

/// Spend and ceiling for one evaluation. Only the latest one is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub period_start: Timestamp,
    pub accumulated_spend: Spend,
    pub ceiling: BudgetCeiling,
}

/// Decision produced by [`evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Unchanged,
    Close { reason: String },
}

/// Evaluation rule: close iff spend has reached the ceiling while the gate is open.
pub fn evaluate(snapshot: &BudgetSnapshot, gate_open: bool) -> AdmissionDecision {
    if gate_open && snapshot.ceiling.is_exceeded_by(snapshot.accumulated_spend) {
        AdmissionDecision::Close {
            reason: format!(
                "budget ceiling exceeded: spend={}, ceiling={}",
                snapshot.accumulated_spend, snapshot.ceiling
            ),
        }
    } else {
        AdmissionDecision::Unchanged
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Read access to accumulated spend.
#[async_trait]
pub trait CostSource: Send + Sync {
    async fn current_spend(&self) -> Result<SpendReport, CostSourceError>;
}

/// Outbound channel for budget alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn alert(&self, alert: &BudgetAlert) -> Result<(), PublishError>;
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Result of one [`BudgetMonitor::run_cycle`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Spend or gate state could not be read; the gate was left as it was.
    Skipped { reason: String },
    /// No change to admission.
    Unchanged(BudgetSnapshot),
    /// This cycle closed the gate.
    Closed { snapshot: BudgetSnapshot, reason: String },
}

pub struct BudgetMonitor {
    admission: Arc<AdmissionController>,
    source: Arc<dyn CostSource>,
    alerts: Arc<dyn AlertChannel>,
    ceiling: BudgetCeiling,
    warn_percent: Option<f64>,
    latest: Mutex<Option<BudgetSnapshot>>,
    // Period for which the warning alert has already gone out.
    warned_period: Mutex<Option<Timestamp>>,
}

impl BudgetMonitor {
    pub fn new(
        admission: Arc<AdmissionController>,
        source: Arc<dyn CostSource>,
        alerts: Arc<dyn AlertChannel>,
        ceiling: BudgetCeiling,
    ) -> Self {
        Self {
            admission,
            source,
            alerts,
            ceiling,
            warn_percent: Some(DEFAULT_WARN_PERCENT),
            latest: Mutex::new(None),
            warned_period: Mutex::new(None),
        }
    }

    /// Sets the warning threshold; `None` disables warnings.
    pub fn with_warn_percent(mut self, percent: Option<f64>) -> Self {
        self.warn_percent = percent;
        self
    }

    pub fn ceiling(&self) -> BudgetCeiling {
        self.ceiling
    }

    /// The snapshot from the most recent successful read.
    pub fn latest_snapshot(&self) -> Option<BudgetSnapshot> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Applies [`evaluate`] against the current gate state.
    pub async fn evaluate(
        &self,
        snapshot: &BudgetSnapshot,
    ) -> Result<AdmissionDecision, AdmissionStoreError> {
        let open = self.admission.is_open().await?;
        Ok(evaluate(snapshot, open))
    }

    /// Runs one evaluation cycle: read spend, decide, apply, alert.
    #[instrument(skip_all, fields(ceiling = %self.ceiling))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let report = match self.source.current_spend().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Cost source unavailable; skipping budget evaluation");
                return CycleOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };
        let snapshot = BudgetSnapshot {
            period_start: report.period_start,
            accumulated_spend: report.accumulated_spend,
            ceiling: self.ceiling,
        };
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());

        let gate_open = match self.admission.is_open().await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "Admission state unreadable; skipping budget evaluation");
                return CycleOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        match evaluate(&snapshot, gate_open) {
            AdmissionDecision::Unchanged => {
                if gate_open {
                    self.maybe_warn(&snapshot).await;
                }
                info!(spend = %snapshot.accumulated_spend, "Budget evaluated; admission unchanged");
                CycleOutcome::Unchanged(snapshot)
            }
            AdmissionDecision::Close { reason } => self.close(snapshot, reason).await,
        }
    }

    async fn close(&self, snapshot: BudgetSnapshot, reason: String) -> CycleOutcome {
        match self.admission.close(reason.clone()).await {
            Ok(CloseOutcome::Closed(state)) => {
                let alert = BudgetAlert::Breached {
                    period_start: snapshot.period_start,
                    spend: snapshot.accumulated_spend,
                    ceiling: snapshot.ceiling,
                    reason: reason.clone(),
                    closed_at: state.closed_at.unwrap_or_else(Timestamp::now),
                };
                self.send(&alert).await;
                CycleOutcome::Closed { snapshot, reason }
            }
            // Another closer won the race; it owns the breach alert.
            Ok(CloseOutcome::AlreadyClosed(_)) => CycleOutcome::Unchanged(snapshot),
            Err(e) => {
                warn!(error = %e, "Failed to close admission; will re-evaluate next cycle");
                CycleOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn maybe_warn(&self, snapshot: &BudgetSnapshot) {
        let Some(threshold) = self.warn_percent else {
            return;
        };
        let Some(percent_used) = snapshot.ceiling.percent_used(snapshot.accumulated_spend) else {
            return;
        };
        if percent_used <= threshold || snapshot.ceiling.is_exceeded_by(snapshot.accumulated_spend) {
            return;
        }
        {
            let mut warned = self.warned_period.lock().unwrap_or_else(|e| e.into_inner());
            if *warned == Some(snapshot.period_start) {
                return;
            }
            *warned = Some(snapshot.period_start);
        }
        warn!(percent_used, "Spend crossed warning threshold");
        let alert = BudgetAlert::Warning {
            period_start: snapshot.period_start,
            spend: snapshot.accumulated_spend,
            ceiling: snapshot.ceiling,
            percent_used,
        };
        self.send(&alert).await;
    }

    async fn send(&self, alert: &BudgetAlert) {
        if let Err(e) = self.alerts.alert(alert).await {
            warn!(error = %e, "Budget alert publish failed; dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedSource(Mutex<Result<SpendReport, CostSourceError>>);

    impl FixedSource {
        fn spend(value: f64) -> Self {
            Self(Mutex::new(Ok(report(value))))
        }

        fn set(&self, value: Result<SpendReport, CostSourceError>) {
            *self.0.lock().unwrap() = value;
        }
    }

    #[async_trait]
    impl CostSource for FixedSource {
        async fn current_spend(&self) -> Result<SpendReport, CostSourceError> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingAlerts(Mutex<Vec<BudgetAlert>>);

    #[async_trait]
    impl AlertChannel for RecordingAlerts {
        async fn alert(&self, alert: &BudgetAlert) -> Result<(), PublishError> {
            self.0.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn period() -> Timestamp {
        Timestamp::parse_rfc3339("2024-03-01T00:00:00Z").unwrap()
    }

    fn report(spend: f64) -> SpendReport {
        SpendReport {
            period_start: period(),
            accumulated_spend: Spend::new(spend).unwrap(),
        }
    }

    fn snapshot(spend: f64, ceiling: f64) -> BudgetSnapshot {
        BudgetSnapshot {
            period_start: period(),
            accumulated_spend: Spend::new(spend).unwrap(),
            ceiling: BudgetCeiling::new(ceiling).unwrap(),
        }
    }

    fn monitor(
        spend: f64,
        ceiling: f64,
    ) -> (
        Arc<AdmissionController>,
        Arc<FixedSource>,
        Arc<RecordingAlerts>,
        BudgetMonitor,
    ) {
        let admission = Arc::new(AdmissionController::in_memory());
        let source = Arc::new(FixedSource::spend(spend));
        let alerts = Arc::new(RecordingAlerts::default());
        let monitor = BudgetMonitor::new(
            admission.clone(),
            source.clone(),
            alerts.clone(),
            BudgetCeiling::new(ceiling).unwrap(),
        );
        (admission, source, alerts, monitor)
    }

    #[test]
    fn rule_closes_at_or_above_ceiling() {
        assert!(matches!(
            evaluate(&snapshot(100.0, 100.0), true),
            AdmissionDecision::Close { .. }
        ));
        assert_eq!(evaluate(&snapshot(99.0, 100.0), true), AdmissionDecision::Unchanged);
    }

    #[test]
    fn rule_leaves_closed_gate_unchanged() {
        assert_eq!(evaluate(&snapshot(500.0, 100.0), false), AdmissionDecision::Unchanged);
    }

    #[test]
    fn close_reason_names_spend_and_ceiling() {
        let AdmissionDecision::Close { reason } = evaluate(&snapshot(150.0, 100.0), true) else {
            panic!("expected close");
        };
        assert_eq!(reason, "budget ceiling exceeded: spend=150, ceiling=100");
    }

    #[tokio::test]
    async fn breach_closes_gate_and_alerts_once() {
        let (admission, _, alerts, monitor) = monitor(150.0, 100.0);
        assert!(matches!(monitor.run_cycle().await, CycleOutcome::Closed { .. }));
        assert!(!admission.is_open().await.unwrap());
        assert!(matches!(monitor.run_cycle().await, CycleOutcome::Unchanged(_)));

        let alerts = alerts.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(alerts[0], BudgetAlert::Breached { .. }));
    }

    #[tokio::test]
    async fn falling_spend_does_not_reopen() {
        let (admission, source, _, monitor) = monitor(150.0, 100.0);
        monitor.run_cycle().await;
        source.set(Ok(report(50.0)));
        monitor.run_cycle().await;
        assert!(!admission.is_open().await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_source_skips_cycle() {
        let (admission, source, alerts, monitor) = monitor(0.0, 100.0);
        source.set(Err(CostSourceError::Unavailable {
            message: "no data".into(),
        }));
        assert!(matches!(monitor.run_cycle().await, CycleOutcome::Skipped { .. }));
        assert!(admission.is_open().await.unwrap());
        assert!(alerts.0.lock().unwrap().is_empty());
        assert!(monitor.latest_snapshot().is_none());
    }

    #[tokio::test]
    async fn warning_is_sent_once_per_period() {
        let (admission, _, alerts, monitor) = monitor(96.0, 100.0);
        monitor.run_cycle().await;
        monitor.run_cycle().await;
        assert!(admission.is_open().await.unwrap());
        let alerts = alerts.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(alerts[0], BudgetAlert::Warning { .. }));
    }

    #[tokio::test]
    async fn spend_exactly_at_threshold_does_not_warn() {
        let (_, _, alerts, monitor) = monitor(95.0, 100.0);
        monitor.run_cycle().await;
        assert!(alerts.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_gate_suppresses_warning() {
        let (admission, _, alerts, monitor) = monitor(97.0, 100.0);
        admission.close("closed by operator").await.unwrap();
        assert!(matches!(monitor.run_cycle().await, CycleOutcome::Unchanged(_)));
        assert!(alerts.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn warnings_can_be_disabled() {
        let (_, _, alerts, monitor) = monitor(99.0, 100.0);
        let monitor = monitor.with_warn_percent(None);
        monitor.run_cycle().await;
        assert!(alerts.0.lock().unwrap().is_empty());
    }
}
