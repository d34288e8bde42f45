//! Error and retry-policy types for the batchgate domain.
//!
//! Each control path has its own error type so that a failure in one path can
//! never be mistaken for, or propagate into, another. Expected outcomes such as
//! a budget rejection or an ignored status event are *not* errors; they are
//! modelled as outcome enums next to the component that produces them.
//!
//! [`RetryPolicy`] is a cross-cutting concern: this crate never retries, but
//! errors that an external supervisor may want to retry report a policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let a supervising process decide
/// whether to re-invoke an operation.
///
/// - `Retryable` errors: substrate timeouts, connection failures, throttling.
/// - `NonRetryable` errors: rejected requests, malformed data, misconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Arrival validation
// ---------------------------------------------------------------------------

/// An arrival notification that cannot be turned into a job request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrivalError {
    /// The artifact identifier was empty.
    #[error("Arrival has an empty artifact identifier")]
    EmptyArtifact,

    /// The source location could not be resolved to a container and key.
    #[error("Arrival source location is not resolvable: '{location}'")]
    UnresolvableSource {
        /// The location as received.
        location: String,
    },
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Failure reported by the job substrate's submission interface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    /// The substrate could not be reached or timed out.
    #[error("Job substrate unavailable: {message}")]
    Unavailable {
        /// Transport-level description.
        message: String,
        /// Back-off hint supplied by the substrate, if any.
        retry_after: Option<Duration>,
    },

    /// The substrate refused the request (invalid definition, queue disabled, ...).
    #[error("Job substrate rejected the request: {message}")]
    Rejected {
        /// Substrate-supplied reason.
        message: String,
    },
}

impl SubmissionError {
    /// Returns whether a supervisor may resubmit after this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Unavailable { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Rejected { .. } => RetryPolicy::NonRetryable,
        }
    }
}

/// Errors surfaced by [`crate::SubmissionGateway::on_arrival`].
///
/// A budget rejection is not in this list: it is an expected outcome.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The arrival notification failed validation.
    #[error(transparent)]
    InvalidArrival(#[from] ArrivalError),

    /// The admission state could not be read.
    #[error("Admission state unavailable: {0}")]
    Admission(#[from] AdmissionStoreError),

    /// The job substrate failed to accept the request.
    #[error("Job submission failed: {0}")]
    Submission(#[from] SubmissionError),
}

// ---------------------------------------------------------------------------
// Notification channel
// ---------------------------------------------------------------------------

/// Failure to hand a notification or alert to its channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The channel could not be reached.
    #[error("Notification channel unreachable: {message}")]
    Transport {
        /// Transport-level description.
        message: String,
    },

    /// The channel answered but refused the message.
    #[error("Notification channel refused the message with status {status}: {message}")]
    Refused {
        /// Channel-specific status code.
        status: u16,
        /// Channel-supplied body or reason.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Cost source
// ---------------------------------------------------------------------------

/// Failure to obtain current spend from the cost-accounting collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CostSourceError {
    /// The cost source could not be reached or has no data yet.
    #[error("Cost source unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The cost source answered with data that could not be interpreted.
    #[error("Cost source returned malformed data: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },
}

impl CostSourceError {
    /// Returns whether the next cycle can expect a different result.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Unavailable { .. } => RetryPolicy::Retryable { after: None },
            Self::Malformed { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Admission store
// ---------------------------------------------------------------------------

/// Failure reading or writing the shared admission state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionStoreError {
    /// The backing storage failed.
    #[error("Admission store I/O failed: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },

    /// The stored state could not be decoded.
    #[error("Admission store holds corrupt state: {message}")]
    Corrupt {
        /// Description of the decoding problem.
        message: String,
    },

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("Admission state update lost {attempts} consecutive races")]
    Contended {
        /// Number of attempts made.
        attempts: u32,
    },
}
