//! Inbound and outbound event payloads.
//!
//! [`ArrivalEvent`] and [`JobStatusEvent`] flow into the core from external
//! trigger sources; [`Notification`] and [`BudgetAlert`] flow out to channels.
//! All of them are immutable once constructed.

use serde::{Deserialize, Serialize};

use crate::{
    ArrivalError, ArtifactId, BudgetCeiling, JobId, JobName, ObjectLocation, Spend, Timestamp,
};

// ---------------------------------------------------------------------------
// Arrivals
// ---------------------------------------------------------------------------

/// Notification that a new input artifact is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalEvent {
    /// Key of the artifact within the monitored location.
    pub artifact: ArtifactId,
    /// Where the artifact can be read from.
    pub source: ObjectLocation,
    /// When the trigger source observed the artifact.
    pub arrived_at: Timestamp,
}

impl ArrivalEvent {
    /// Builds an arrival from raw trigger data, validating both fields.
    pub fn new(
        artifact: impl Into<String>,
        source: &str,
        arrived_at: Timestamp,
    ) -> Result<Self, ArrivalError> {
        let artifact = ArtifactId::new(artifact).ok_or(ArrivalError::EmptyArtifact)?;
        let source =
            ObjectLocation::parse(source).ok_or_else(|| ArrivalError::UnresolvableSource {
                location: source.to_string(),
            })?;
        Ok(Self {
            artifact,
            source,
            arrived_at,
        })
    }

    /// Builds an arrival for an object location, using its key as the artifact.
    pub fn for_object(source: ObjectLocation, arrived_at: Timestamp) -> Result<Self, ArrivalError> {
        let artifact = ArtifactId::new(source.key()).ok_or(ArrivalError::EmptyArtifact)?;
        Ok(Self {
            artifact,
            source,
            arrived_at,
        })
    }

    /// Key under which redelivered copies of this arrival are recognised.
    pub fn dedup_key(&self) -> ArrivalKey {
        ArrivalKey {
            artifact: self.artifact.clone(),
            arrived_at: self.arrived_at,
        }
    }
}

/// Identity of one arrival for deduplication: `(artifact, arrived_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrivalKey {
    artifact: ArtifactId,
    arrived_at: Timestamp,
}

impl ArrivalKey {
    /// The artifact part of the key.
    pub fn artifact(&self) -> &ArtifactId {
        &self.artifact
    }
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Lifecycle status reported by the job substrate.
///
/// Statuses the core does not know are preserved verbatim in
/// [`JobStatus::Other`] and treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl JobStatus {
    /// Parses the substrate's upper-case status name.
    pub fn parse(value: &str) -> Self {
        match value {
            "SUBMITTED" => Self::Submitted,
            "PENDING" => Self::Pending,
            "RUNNABLE" => Self::Runnable,
            "STARTING" => Self::Starting,
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    /// The substrate's upper-case status name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Runnable => "RUNNABLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Other(s) => s,
        }
    }

    /// Returns `true` for `SUCCEEDED` and `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle transition of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub job_id: JobId,
    /// Present when the substrate reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<JobName>,
    pub status: JobStatus,
    pub occurred_at: Timestamp,
}

impl JobStatusEvent {
    pub fn new(job_id: JobId, status: JobStatus, occurred_at: Timestamp) -> Self {
        Self {
            job_id,
            job_name: None,
            status,
            occurred_at,
        }
    }

    /// Attaches the job name reported alongside the status.
    pub fn with_name(mut self, job_name: JobName) -> Self {
        self.job_name = Some(job_name);
        self
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Normalised notification derived 1:1 from a terminal [`JobStatusEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<JobName>,
    pub status: JobStatus,
    pub occurred_at: Timestamp,
    pub message: String,
}

impl Notification {
    /// Normalises a status event. Returns `None` for non-terminal statuses.
    pub fn from_terminal(event: &JobStatusEvent) -> Option<Self> {
        let outcome = match event.status {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            _ => return None,
        };
        let message = match &event.job_name {
            Some(name) => format!("Job {} ({name}) {outcome}", event.job_id),
            None => format!("Job {} {outcome}", event.job_id),
        };
        Some(Self {
            job_id: event.job_id.clone(),
            job_name: event.job_name.clone(),
            status: event.status.clone(),
            occurred_at: event.occurred_at,
            message,
        })
    }
}

/// Budget-related alert emitted by the budget monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetAlert {
    /// Spend crossed the warning threshold; admission is unaffected.
    Warning {
        period_start: Timestamp,
        spend: Spend,
        ceiling: BudgetCeiling,
        percent_used: f64,
    },
    /// Spend reached the ceiling and admission was closed.
    Breached {
        period_start: Timestamp,
        spend: Spend,
        ceiling: BudgetCeiling,
        reason: String,
        closed_at: Timestamp,
    },
}
