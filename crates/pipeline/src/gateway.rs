//! Submission gateway: turns one arrival into at most one job submission.
//!
//! Order of checks for every arrival:
//!
//! 1. admission gate (closed ⇒ [`ArrivalOutcome::Rejected`], no submission)
//! 2. deduplication window (seen ⇒ [`ArrivalOutcome::Duplicate`])
//! 3. submit exactly one [`JobRequest`] to the [`JobSubmitter`]
//!
//! Submission failures are returned to the caller and never retried here.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::{
    AdmissionController, ArrivalDeduplicator, ArrivalEvent, ArtifactId, GatewayError,
    JobDefinitionName, JobId, JobName, JobQueueName, ObjectLocation, SubmissionError, Timestamp,
};

/// Rejection reason returned while the admission gate is closed.
pub const BUDGET_CLOSED: &str = "budget-closed";

/// Environment variable naming the input container handed to the job.
pub const ENV_INPUT_CONTAINER: &str = "S3_INPUT_BUCKET";
/// Environment variable naming the input object key handed to the job.
pub const ENV_INPUT_OBJECT: &str = "S3_INPUT_OBJECT";
/// Environment variable naming the output container handed to the job.
pub const ENV_OUTPUT_CONTAINER: &str = "S3_OUTPUT_BUCKET";

// ---------------------------------------------------------------------------
// Requests and receipts
// ---------------------------------------------------------------------------

/// A request for one job over one input artifact.
///
/// Created by the gateway and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: JobId,
    pub job_name: JobName,
    pub input: ObjectLocation,
    pub job_queue: JobQueueName,
    pub job_definition: JobDefinitionName,
    /// Container environment overrides for the job.
    pub environment: BTreeMap<String, String>,
    pub submitted_at: Timestamp,
}

/// Acknowledgement returned by the job substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub job_id: JobId,
    pub job_name: JobName,
    pub accepted_at: Timestamp,
}

/// Where and how accepted arrivals are submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionTarget {
    pub job_queue: JobQueueName,
    pub job_definition: JobDefinitionName,
    /// Container the job writes its output artifact to, if configured.
    pub output_container: Option<String>,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Submission interface of the job substrate.
///
/// Implementations should treat [`JobRequest::job_id`] as an idempotency key.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, request: &JobRequest) -> Result<SubmissionReceipt, SubmissionError>;
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Outcome of [`SubmissionGateway::on_arrival`] when no error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Exactly one job was submitted.
    Submitted {
        request: JobRequest,
        receipt: SubmissionReceipt,
    },
    /// The admission gate is closed; nothing was submitted.
    Rejected {
        /// Always [`BUDGET_CLOSED`].
        reason: String,
        /// The reason the gate was closed, for the caller's logs.
        closure_reason: Option<String>,
    },
    /// The same arrival was already accepted inside the deduplication window.
    Duplicate { artifact: ArtifactId },
}

pub struct SubmissionGateway {
    admission: Arc<AdmissionController>,
    submitter: Arc<dyn JobSubmitter>,
    target: SubmissionTarget,
    dedup: ArrivalDeduplicator,
}

impl SubmissionGateway {
    pub fn new(
        admission: Arc<AdmissionController>,
        submitter: Arc<dyn JobSubmitter>,
        target: SubmissionTarget,
        dedup: ArrivalDeduplicator,
    ) -> Self {
        Self {
            admission,
            submitter,
            target,
            dedup,
        }
    }

    /// Handles one arrival notification.
    #[instrument(skip_all, fields(artifact = %event.artifact, source = %event.source))]
    pub async fn on_arrival(&self, event: ArrivalEvent) -> Result<ArrivalOutcome, GatewayError> {
        let state = self.admission.state().await?;
        if !state.is_open() {
            info!(
                closure_reason = state.reason.as_deref().unwrap_or(""),
                "Arrival rejected: admission closed"
            );
            return Ok(ArrivalOutcome::Rejected {
                reason: BUDGET_CLOSED.to_string(),
                closure_reason: state.reason,
            });
        }

        let key = event.dedup_key();
        if !self.dedup.claim(&key) {
            info!("Duplicate arrival ignored");
            return Ok(ArrivalOutcome::Duplicate {
                artifact: event.artifact,
            });
        }

        let request = self.build_request(&event);
        match self.submitter.submit(&request).await {
            Ok(receipt) => {
                info!(job_id = %receipt.job_id, job_name = %receipt.job_name, "Job submitted");
                Ok(ArrivalOutcome::Submitted { request, receipt })
            }
            Err(e) => {
                self.dedup.release(&key);
                error!(job_id = %request.job_id, error = %e, "Job submission failed");
                Err(e.into())
            }
        }
    }

    fn build_request(&self, event: &ArrivalEvent) -> JobRequest {
        let mut environment = BTreeMap::new();
        environment.insert(
            ENV_INPUT_CONTAINER.to_string(),
            event.source.container().to_string(),
        );
        environment.insert(ENV_INPUT_OBJECT.to_string(), event.source.key().to_string());
        if let Some(output) = &self.target.output_container {
            environment.insert(ENV_OUTPUT_CONTAINER.to_string(), output.clone());
        }

        JobRequest {
            job_id: JobId::generate(),
            job_name: JobName::from_artifact(&event.artifact),
            input: event.source.clone(),
            job_queue: self.target.job_queue.clone(),
            job_definition: self.target.job_definition.clone(),
            environment,
            submitted_at: Timestamp::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSubmitter {
        requests: Mutex<Vec<JobRequest>>,
        fail_with: Mutex<Option<SubmissionError>>,
    }

    #[async_trait]
    impl JobSubmitter for RecordingSubmitter {
        async fn submit(&self, request: &JobRequest) -> Result<SubmissionReceipt, SubmissionError> {
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            self.requests.lock().unwrap().push(request.clone());
            Ok(SubmissionReceipt {
                job_id: request.job_id.clone(),
                job_name: request.job_name.clone(),
                accepted_at: Timestamp::now(),
            })
        }
    }

    fn target() -> SubmissionTarget {
        SubmissionTarget {
            job_queue: JobQueueName::new("research-queue").unwrap(),
            job_definition: JobDefinitionName::new("cram-to-bam").unwrap(),
            output_container: Some("output-bucket".into()),
        }
    }

    fn gateway(submitter: Arc<RecordingSubmitter>) -> (Arc<AdmissionController>, SubmissionGateway) {
        let admission = Arc::new(AdmissionController::in_memory());
        let gw = SubmissionGateway::new(
            admission.clone(),
            submitter,
            target(),
            ArrivalDeduplicator::default(),
        );
        (admission, gw)
    }

    fn arrival(key: &str) -> ArrivalEvent {
        ArrivalEvent::new(key, &format!("s3://input-bucket/{key}"), Timestamp::now()).unwrap()
    }

    #[tokio::test]
    async fn open_gate_submits_one_request() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let (_, gw) = gateway(submitter.clone());

        let outcome = gw.on_arrival(arrival("runs/x.cram")).await.unwrap();
        let ArrivalOutcome::Submitted { request, receipt } = outcome else {
            panic!("expected submission");
        };
        assert_eq!(request.job_id, receipt.job_id);
        assert_eq!(request.job_name.as_str(), "runs_x_cram");
        assert_eq!(request.environment[ENV_INPUT_CONTAINER], "input-bucket");
        assert_eq!(request.environment[ENV_INPUT_OBJECT], "runs/x.cram");
        assert_eq!(request.environment[ENV_OUTPUT_CONTAINER], "output-bucket");
        assert_eq!(submitter.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_gate_rejects_without_submitting() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let (admission, gw) = gateway(submitter.clone());
        admission.close("over budget").await.unwrap();

        let outcome = gw.on_arrival(arrival("x.cram")).await.unwrap();
        assert_eq!(
            outcome,
            ArrivalOutcome::Rejected {
                reason: BUDGET_CLOSED.to_string(),
                closure_reason: Some("over budget".into()),
            }
        );
        assert!(submitter.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn redelivered_arrival_is_submitted_once() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let (_, gw) = gateway(submitter.clone());
        let event = arrival("x.cram");

        assert!(matches!(
            gw.on_arrival(event.clone()).await.unwrap(),
            ArrivalOutcome::Submitted { .. }
        ));
        assert!(matches!(
            gw.on_arrival(event).await.unwrap(),
            ArrivalOutcome::Duplicate { .. }
        ));
        assert_eq!(submitter.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn distinct_artifacts_get_distinct_job_ids() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let (_, gw) = gateway(submitter.clone());
        gw.on_arrival(arrival("a.cram")).await.unwrap();
        gw.on_arrival(arrival("b.cram")).await.unwrap();
        let requests = submitter.requests.lock().unwrap();
        assert_ne!(requests[0].job_id, requests[1].job_id);
    }

    #[tokio::test]
    async fn submission_failure_is_reported_and_redelivery_allowed() {
        let submitter = Arc::new(RecordingSubmitter::default());
        *submitter.fail_with.lock().unwrap() = Some(SubmissionError::Unavailable {
            message: "connection reset".into(),
            retry_after: None,
        });
        let (_, gw) = gateway(submitter.clone());
        let event = arrival("x.cram");

        let err = gw.on_arrival(event.clone()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Submission(_)));

        assert!(matches!(
            gw.on_arrival(event).await.unwrap(),
            ArrivalOutcome::Submitted { .. }
        ));
    }
}
