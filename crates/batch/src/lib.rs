//! batchgate job substrate adapter.
//!
//! Implements [`pipeline::JobSubmitter`] by running the configured job
//! executable as a local child process, one per accepted [`JobRequest`], and
//! reporting its lifecycle on the status stream as [`JobStatusEvent`]s.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Attempt counting, per-attempt timeouts and process
//! management live here. The [`pipeline`] crate sees only the submission
//! port and the status events, exactly as it would from a managed batch
//! service.
//!
//! ## Lifecycle
//!
//! `SUBMITTED` → (`RUNNABLE` → `STARTING` → `RUNNING`) × attempts →
//! `SUCCEEDED` | `FAILED`
//!
//! `RUNNING` is reported only once the process has been spawned. A job's
//! receipt is forgotten when it reaches a terminal status.
//!
//! The job receives its container environment overrides plus
//! `BATCHGATE_JOB_ID` and `BATCHGATE_ATTEMPT`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    JobDefinitionName, JobId, JobRequest, JobStatus, JobStatusEvent, JobSubmitter,
    SubmissionError, SubmissionReceipt, Timestamp,
};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Default number of attempts per job.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default per-attempt timeout: one day.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// The executable step and its execution limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessJobDefinition {
    /// Name jobs must reference to be accepted.
    pub name: JobDefinitionName,
    pub program: String,
    pub args: Vec<String>,
    /// At least one attempt is always made.
    pub attempts: u32,
    pub attempt_timeout: Duration,
}

/// [`JobSubmitter`] that runs jobs as local child processes.
pub struct ProcessJobSubmitter {
    definition: Arc<ProcessJobDefinition>,
    statuses: mpsc::Sender<JobStatusEvent>,
    // Receipts of jobs not yet terminal; resubmitting one of them returns
    // the first receipt.
    accepted: Arc<Mutex<HashMap<JobId, SubmissionReceipt>>>,
}

impl ProcessJobSubmitter {
    pub fn new(definition: ProcessJobDefinition, statuses: mpsc::Sender<JobStatusEvent>) -> Self {
        Self {
            definition: Arc::new(definition),
            statuses,
            accepted: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of accepted jobs that have not reached a terminal status.
    pub fn active_jobs(&self) -> usize {
        self.accepted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl JobSubmitter for ProcessJobSubmitter {
    #[instrument(skip_all, fields(job_id = %request.job_id, job_name = %request.job_name))]
    async fn submit(&self, request: &JobRequest) -> Result<SubmissionReceipt, SubmissionError> {
        if request.job_definition != self.definition.name {
            return Err(SubmissionError::Rejected {
                message: format!("unknown job definition '{}'", request.job_definition),
            });
        }
        if self.statuses.is_closed() {
            return Err(SubmissionError::Unavailable {
                message: "status stream closed".into(),
                retry_after: None,
            });
        }

        let receipt = {
            let mut accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = accepted.get(&request.job_id) {
                debug!("Job already accepted; returning original receipt");
                return Ok(existing.clone());
            }
            let receipt = SubmissionReceipt {
                job_id: request.job_id.clone(),
                job_name: request.job_name.clone(),
                accepted_at: Timestamp::now(),
            };
            accepted.insert(request.job_id.clone(), receipt.clone());
            receipt
        };

        emit(&self.statuses, request, JobStatus::Submitted).await;
        let definition = self.definition.clone();
        let accepted = self.accepted.clone();
        let statuses = self.statuses.clone();
        let request = request.clone();
        tokio::spawn(async move {
            let outcome = run_attempts(&definition, &request, &statuses).await;
            accepted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request.job_id);
            emit(&statuses, &request, outcome).await;
        });
        Ok(receipt)
    }
}

/// Runs up to `attempts` attempts and returns the terminal status.
#[instrument(skip_all, fields(job_id = %request.job_id))]
async fn run_attempts(
    definition: &ProcessJobDefinition,
    request: &JobRequest,
    statuses: &mpsc::Sender<JobStatusEvent>,
) -> JobStatus {
    let attempts = definition.attempts.max(1);
    for attempt in 1..=attempts {
        emit(statuses, request, JobStatus::Runnable).await;
        emit(statuses, request, JobStatus::Starting).await;

        let mut command = Command::new(&definition.program);
        command
            .args(&definition.args)
            .envs(&request.environment)
            .env("BATCHGATE_JOB_ID", request.job_id.as_str())
            .env("BATCHGATE_ATTEMPT", attempt.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(attempt, program = %definition.program, error = %e, "Job attempt could not start");
                continue;
            }
        };
        emit(statuses, request, JobStatus::Running).await;
        match tokio::time::timeout(definition.attempt_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                info!(attempt, "Job succeeded");
                return JobStatus::Succeeded;
            }
            Ok(Ok(status)) => warn!(attempt, %status, "Job attempt failed"),
            Ok(Err(e)) => warn!(attempt, error = %e, "Job attempt could not be awaited"),
            Err(_) => {
                warn!(
                    attempt,
                    timeout_secs = definition.attempt_timeout.as_secs(),
                    "Job attempt timed out"
                );
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Timed-out job already exited");
                }
            }
        }
    }
    JobStatus::Failed
}

async fn emit(statuses: &mpsc::Sender<JobStatusEvent>, request: &JobRequest, status: JobStatus) {
    let event = JobStatusEvent::new(request.job_id.clone(), status, Timestamp::now())
        .with_name(request.job_name.clone());
    if statuses.send(event).await.is_err() {
        debug!("Status stream closed; event discarded");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pipeline::{JobName, JobQueueName, ObjectLocation};
    use std::collections::BTreeMap;

    fn definition(script: &str, attempts: u32) -> ProcessJobDefinition {
        ProcessJobDefinition {
            name: JobDefinitionName::new("cram-to-bam").unwrap(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            attempts,
            attempt_timeout: Duration::from_secs(10),
        }
    }

    fn request() -> JobRequest {
        let mut environment = BTreeMap::new();
        environment.insert("S3_INPUT_OBJECT".to_string(), "x.cram".to_string());
        JobRequest {
            job_id: JobId::generate(),
            job_name: JobName::new("x_cram").unwrap(),
            input: ObjectLocation::parse("s3://in/x.cram").unwrap(),
            job_queue: JobQueueName::new("q").unwrap(),
            job_definition: JobDefinitionName::new("cram-to-bam").unwrap(),
            environment,
            submitted_at: Timestamp::now(),
        }
    }

    async fn statuses_until_terminal(rx: &mut mpsc::Receiver<JobStatusEvent>) -> Vec<JobStatus> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.status.is_terminal();
            seen.push(event.status);
            if terminal {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn successful_job_reports_full_lifecycle() {
        let (tx, mut rx) = mpsc::channel(32);
        let submitter = ProcessJobSubmitter::new(definition(r#"test "$S3_INPUT_OBJECT" = x.cram"#, 1), tx);
        submitter.submit(&request()).await.unwrap();

        assert_eq!(
            statuses_until_terminal(&mut rx).await,
            vec![
                JobStatus::Submitted,
                JobStatus::Runnable,
                JobStatus::Starting,
                JobStatus::Running,
                JobStatus::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn failing_job_is_retried_then_fails() {
        let (tx, mut rx) = mpsc::channel(64);
        let submitter = ProcessJobSubmitter::new(definition("exit 3", 2), tx);
        submitter.submit(&request()).await.unwrap();

        let seen = statuses_until_terminal(&mut rx).await;
        assert_eq!(seen.last(), Some(&JobStatus::Failed));
        assert_eq!(seen.iter().filter(|s| **s == JobStatus::Running).count(), 2);
    }

    #[tokio::test]
    async fn timed_out_attempt_counts_as_failure() {
        let (tx, mut rx) = mpsc::channel(32);
        let mut def = definition("sleep 5", 1);
        def.attempt_timeout = Duration::from_millis(100);
        let submitter = ProcessJobSubmitter::new(def, tx);
        submitter.submit(&request()).await.unwrap();

        assert_eq!(statuses_until_terminal(&mut rx).await.last(), Some(&JobStatus::Failed));
    }

    #[tokio::test]
    async fn missing_program_never_reports_running() {
        let (tx, mut rx) = mpsc::channel(32);
        let mut def = definition("true", 2);
        def.program = "/nonexistent/batchgate-job".into();
        let submitter = ProcessJobSubmitter::new(def, tx);
        submitter.submit(&request()).await.unwrap();

        let seen = statuses_until_terminal(&mut rx).await;
        assert_eq!(seen.last(), Some(&JobStatus::Failed));
        assert!(!seen.contains(&JobStatus::Running));
        assert_eq!(seen.iter().filter(|s| **s == JobStatus::Starting).count(), 2);
    }

    #[tokio::test]
    async fn receipts_are_dropped_once_jobs_finish() {
        let (tx, mut rx) = mpsc::channel(32);
        let submitter = ProcessJobSubmitter::new(definition("true", 1), tx);
        submitter.submit(&request()).await.unwrap();
        assert_eq!(submitter.active_jobs(), 1);

        statuses_until_terminal(&mut rx).await;
        assert_eq!(submitter.active_jobs(), 0);
    }

    #[tokio::test]
    async fn resubmission_of_same_job_is_idempotent() {
        let (tx, _rx) = mpsc::channel(32);
        let submitter = ProcessJobSubmitter::new(definition("sleep 5", 1), tx);
        let req = request();
        let first = submitter.submit(&req).await.unwrap();
        let second = submitter.submit(&req).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_definition_is_rejected() {
        let (tx, _rx) = mpsc::channel(32);
        let submitter = ProcessJobSubmitter::new(definition("true", 1), tx);
        let mut req = request();
        req.job_definition = JobDefinitionName::new("other").unwrap();
        let err = submitter.submit(&req).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected { .. }));
    }

    #[tokio::test]
    async fn closed_status_stream_is_unavailable() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let submitter = ProcessJobSubmitter::new(definition("true", 1), tx);
        let err = submitter.submit(&request()).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Unavailable { .. }));
    }
}
