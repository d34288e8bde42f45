//! Core orchestration domain for batchgate.
//!
//! batchgate submits one batch job per arriving input artifact, routes the
//! terminal status of each job to a notification channel, and closes
//! admission of new jobs once accumulated spend reaches a budget ceiling.
//! This crate holds all of that control logic plus the port traits the
//! infrastructure crates implement.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ArtifactId`, `JobId`, `JobName`, ...) |
//! | [`types`] | Value types (`Spend`, `BudgetCeiling`, `ObjectLocation`, `Timestamp`) |
//! | [`events`] | Arrival, status, notification and alert payloads |
//! | [`errors`] | Per-path error types and [`RetryPolicy`] |
//! | [`admission`] | Admission gate, [`AdmissionStore`] port, in-memory store |
//! | [`dedup`] | Bounded recent-arrivals cache |
//! | [`gateway`] | Submission gateway and [`JobSubmitter`] port |
//! | [`router`] | Status filter/router and [`NotificationChannel`] port |
//! | [`budget`] | Budget monitor, [`CostSource`] and [`AlertChannel`] ports |
//!
//! The three control paths (gateway, router, budget monitor) share nothing
//! but the [`AdmissionController`]; an error in one never reaches another.

pub mod admission;
pub mod budget;
pub mod dedup;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod identifiers;
pub mod router;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use admission::{
    AdmissionController, AdmissionRecord, AdmissionState, AdmissionStore, CloseOutcome, Gate,
    InMemoryAdmissionStore, ResetOutcome,
};
pub use budget::{
    evaluate, AdmissionDecision, AlertChannel, BudgetMonitor, BudgetSnapshot, CostSource,
    CycleOutcome, SpendReport, DEFAULT_WARN_PERCENT,
};
pub use dedup::{ArrivalDeduplicator, DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_WINDOW};
pub use errors::{
    AdmissionStoreError, ArrivalError, CostSourceError, GatewayError, PublishError, RetryPolicy,
    SubmissionError,
};
pub use events::{ArrivalEvent, ArrivalKey, BudgetAlert, JobStatus, JobStatusEvent, Notification};
pub use gateway::{
    ArrivalOutcome, JobRequest, JobSubmitter, SubmissionGateway, SubmissionReceipt,
    SubmissionTarget, BUDGET_CLOSED, ENV_INPUT_CONTAINER, ENV_INPUT_OBJECT, ENV_OUTPUT_CONTAINER,
};
pub use identifiers::{ArtifactId, JobDefinitionName, JobId, JobName, JobQueueName, MAX_JOB_NAME_LEN};
pub use router::{EventRouter, NotificationChannel, RouteOutcome};
pub use types::{BudgetCeiling, ObjectLocation, Spend, Timestamp};
