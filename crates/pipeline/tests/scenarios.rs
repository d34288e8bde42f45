//! End-to-end behaviour of the three control paths over in-memory adapters.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipeline::{
    AdmissionController, AlertChannel, ArrivalDeduplicator, ArrivalEvent, ArrivalOutcome,
    BudgetAlert, BudgetCeiling, BudgetMonitor, CostSource, CostSourceError, CycleOutcome,
    EventRouter, JobDefinitionName, JobQueueName, JobRequest, JobStatus, JobStatusEvent,
    JobSubmitter, Notification, NotificationChannel, PublishError, RouteOutcome, Spend,
    SpendReport, SubmissionError, SubmissionGateway, SubmissionReceipt, SubmissionTarget,
    Timestamp, BUDGET_CLOSED,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeSubstrate {
    requests: Mutex<Vec<JobRequest>>,
}

#[async_trait]
impl JobSubmitter for FakeSubstrate {
    async fn submit(&self, request: &JobRequest) -> Result<SubmissionReceipt, SubmissionError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(SubmissionReceipt {
            job_id: request.job_id.clone(),
            job_name: request.job_name.clone(),
            accepted_at: Timestamp::now(),
        })
    }
}

#[derive(Default)]
struct FakeChannel {
    notifications: Mutex<Vec<Notification>>,
    alerts: Mutex<Vec<BudgetAlert>>,
}

#[async_trait]
impl NotificationChannel for FakeChannel {
    async fn publish(&self, notification: &Notification) -> Result<(), PublishError> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for FakeChannel {
    async fn alert(&self, alert: &BudgetAlert) -> Result<(), PublishError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct FakeCosts(Mutex<f64>);

#[async_trait]
impl CostSource for FakeCosts {
    async fn current_spend(&self) -> Result<SpendReport, CostSourceError> {
        let spend = *self.0.lock().unwrap();
        Ok(SpendReport {
            period_start: Timestamp::parse_rfc3339("2024-03-01T00:00:00Z").unwrap(),
            accumulated_spend: Spend::new(spend).unwrap(),
        })
    }
}

struct Harness {
    admission: Arc<AdmissionController>,
    substrate: Arc<FakeSubstrate>,
    channel: Arc<FakeChannel>,
    costs: Arc<FakeCosts>,
    gateway: Arc<SubmissionGateway>,
    router: EventRouter,
    monitor: BudgetMonitor,
}

fn harness(ceiling: f64) -> Harness {
    let admission = Arc::new(AdmissionController::in_memory());
    let substrate = Arc::new(FakeSubstrate::default());
    let channel = Arc::new(FakeChannel::default());
    let costs = Arc::new(FakeCosts(Mutex::new(0.0)));
    let gateway = Arc::new(SubmissionGateway::new(
        admission.clone(),
        substrate.clone(),
        SubmissionTarget {
            job_queue: JobQueueName::new("research-queue").unwrap(),
            job_definition: JobDefinitionName::new("cram-to-bam").unwrap(),
            output_container: None,
        },
        ArrivalDeduplicator::default(),
    ));
    let router = EventRouter::new(channel.clone());
    let monitor = BudgetMonitor::new(
        admission.clone(),
        costs.clone(),
        channel.clone(),
        BudgetCeiling::new(ceiling).unwrap(),
    );
    Harness {
        admission,
        substrate,
        channel,
        costs,
        gateway,
        router,
        monitor,
    }
}

fn arrival(key: &str) -> ArrivalEvent {
    ArrivalEvent::new(key, &format!("s3://input/{key}"), Timestamp::now()).unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn arrival_to_success_notification() {
    let h = harness(100.0);

    let ArrivalOutcome::Submitted { request, .. } =
        h.gateway.on_arrival(arrival("x.cram")).await.unwrap()
    else {
        panic!("expected submission");
    };

    let event = JobStatusEvent::new(request.job_id.clone(), JobStatus::Succeeded, Timestamp::now());
    let outcome = h.router.on_job_status_event(&event).await;
    assert!(matches!(outcome, RouteOutcome::Published(_)));

    let published = h.channel.notifications.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].job_id, request.job_id);
    assert_eq!(published[0].status, JobStatus::Succeeded);
}

#[tokio::test]
async fn breach_closes_and_lower_spend_does_not_reopen() {
    let h = harness(100.0);
    *h.costs.0.lock().unwrap() = 150.0;

    let CycleOutcome::Closed { reason, .. } = h.monitor.run_cycle().await else {
        panic!("expected closure");
    };
    assert!(reason.contains("150"));
    assert!(reason.contains("100"));
    let state = h.admission.state().await.unwrap();
    assert_eq!(state.reason.as_deref(), Some(reason.as_str()));

    *h.costs.0.lock().unwrap() = 50.0;
    h.monitor.run_cycle().await;
    assert!(!h.admission.is_open().await.unwrap());
}

#[tokio::test]
async fn arrival_after_closure_is_rejected_without_submission() {
    let h = harness(100.0);
    *h.costs.0.lock().unwrap() = 100.0;
    h.monitor.run_cycle().await;

    let outcome = h.gateway.on_arrival(arrival("x.cram")).await.unwrap();
    assert!(matches!(outcome, ArrivalOutcome::Rejected { ref reason, .. } if reason == BUDGET_CLOSED));
    assert!(h.substrate.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_terminal_events_produce_duplicate_notifications() {
    let h = harness(100.0);
    let job = pipeline::JobId::new("job-7").unwrap();
    let first = JobStatusEvent::new(job.clone(), JobStatus::Failed, Timestamp::now());
    let second = JobStatusEvent::new(job.clone(), JobStatus::Failed, Timestamp::now());

    h.router.on_job_status_event(&first).await;
    h.router.on_job_status_event(&second).await;

    let published = h.channel.notifications.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].job_id, published[1].job_id);
    assert_eq!(published[0].status, published[1].status);
    assert_eq!(published[0].message, published[1].message);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_duplicate_arrivals_submit_once_per_pair() {
    let h = harness(100.0);
    let arrivals: Vec<ArrivalEvent> = (0..5).map(|i| arrival(&format!("s{i}.cram"))).collect();

    let mut handles = Vec::new();
    for _ in 0..4 {
        for event in &arrivals {
            let gateway = h.gateway.clone();
            let event = event.clone();
            handles.push(tokio::spawn(async move { gateway.on_arrival(event).await }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let requests = h.substrate.requests.lock().unwrap();
    assert_eq!(requests.len(), arrivals.len());
    let artifacts: HashSet<_> = requests.iter().map(|r| r.input.key().to_string()).collect();
    assert_eq!(artifacts.len(), arrivals.len());
    let ids: HashSet<_> = requests.iter().map(|r| r.job_id.clone()).collect();
    assert_eq!(ids.len(), arrivals.len());
}

#[tokio::test]
async fn in_flight_jobs_still_notify_after_closure() {
    let h = harness(100.0);
    let ArrivalOutcome::Submitted { request, .. } =
        h.gateway.on_arrival(arrival("x.cram")).await.unwrap()
    else {
        panic!("expected submission");
    };

    h.admission.close("operator drill").await.unwrap();
    let event = JobStatusEvent::new(request.job_id, JobStatus::Succeeded, Timestamp::now());
    assert!(matches!(
        h.router.on_job_status_event(&event).await,
        RouteOutcome::Published(_)
    ));
}

#[tokio::test]
async fn reset_reopens_admission() {
    let h = harness(100.0);
    *h.costs.0.lock().unwrap() = 120.0;
    h.monitor.run_cycle().await;
    assert!(!h.admission.is_open().await.unwrap());

    h.admission.reset().await.unwrap();
    let outcome = h.gateway.on_arrival(arrival("y.cram")).await.unwrap();
    assert!(matches!(outcome, ArrivalOutcome::Submitted { .. }));
    assert_eq!(h.channel.alerts.lock().unwrap().len(), 1);
}
