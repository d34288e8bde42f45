//! batchgate event source infrastructure.
//!
//! Turns external triggers into domain events and dispatches them to the
//! three control paths of the [`pipeline`] crate:
//!
//! | Trigger | Decoded into | Handled by |
//! |---------|--------------|------------|
//! | object-created notification | [`pipeline::ArrivalEvent`] | [`pipeline::SubmissionGateway`] |
//! | job state-change event | [`pipeline::JobStatusEvent`] | [`pipeline::EventRouter`] |
//! | budget tick / cost update | [`BudgetTrigger`] | [`pipeline::BudgetMonitor`] |
//!
//! Triggers reach the handlers only through bounded queues ([`channels`]),
//! and every event is handled in its own task ([`Dispatcher`]).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Wire formats, queueing and task management live here.
//! The [`pipeline`] crate sees only its own event types.

pub mod dispatch;
pub mod envelope;
pub mod source;

pub use dispatch::{
    channels, ArrivalStats, BudgetStats, BudgetTrigger, DispatchStats, Dispatcher,
    DispatcherHandle, Receivers, RouteStats, Senders, DEFAULT_MAX_IN_FLIGHT, DEFAULT_QUEUE_DEPTH,
};
pub use envelope::{decode, Envelope, EnvelopeError, JOB_STATE_CHANGE};
pub use source::{pump_lines, spawn_budget_ticker, PumpStats};
