//! Admission control: the single gate consulted before every submission.
//!
//! The gate is a one-way latch. [`AdmissionController::close`] moves it from
//! OPEN to CLOSED and nothing in this crate moves it back; only the
//! out-of-band [`AdmissionController::reset`] reopens it.
//!
//! State lives behind the [`AdmissionStore`] port so that concurrent and
//! multi-process invocations observe one consistent view. Stores expose a
//! versioned compare-and-swap; the controller is the only writer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{AdmissionStoreError, Timestamp};

/// Bound on compare-and-swap retries before reporting contention.
const MAX_CAS_ATTEMPTS: u32 = 16;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Position of the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Open,
    Closed,
}

/// Process-wide admission state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionState {
    pub gate: Gate,
    /// When the gate was closed; `None` while open.
    pub closed_at: Option<Timestamp>,
    /// Why the gate was closed; `None` while open.
    pub reason: Option<String>,
}

impl AdmissionState {
    /// The initial, open state.
    pub fn open() -> Self {
        Self {
            gate: Gate::Open,
            closed_at: None,
            reason: None,
        }
    }

    /// A closed state recording the breach reason and time.
    pub fn closed(reason: impl Into<String>, at: Timestamp) -> Self {
        Self {
            gate: Gate::Closed,
            closed_at: Some(at),
            reason: Some(reason.into()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.gate == Gate::Open
    }
}

impl Default for AdmissionState {
    fn default() -> Self {
        Self::open()
    }
}

/// Admission state together with its store version.
///
/// The version increases by one on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub state: AdmissionState,
    pub version: u64,
}

impl Default for AdmissionRecord {
    fn default() -> Self {
        Self {
            state: AdmissionState::open(),
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Store port
// ---------------------------------------------------------------------------

/// Storage for the shared admission state.
///
/// Implementations must make [`compare_and_swap`](Self::compare_and_swap)
/// atomic with respect to [`load`](Self::load) and to other writers.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Returns the current record. A store that was never written holds
    /// [`AdmissionRecord::default`].
    async fn load(&self) -> Result<AdmissionRecord, AdmissionStoreError>;

    /// Replaces the state iff the stored version equals `expected_version`.
    ///
    /// Returns the new record on success and `None` when another writer got
    /// there first.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: AdmissionState,
    ) -> Result<Option<AdmissionRecord>, AdmissionStoreError>;
}

/// Single-process [`AdmissionStore`] held in memory.
#[derive(Debug, Default)]
pub struct InMemoryAdmissionStore {
    record: Mutex<AdmissionRecord>,
}

impl InMemoryAdmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdmissionRecord> {
        // A panic while holding the lock cannot leave a half-written record:
        // every write replaces the whole value.
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AdmissionStore for InMemoryAdmissionStore {
    async fn load(&self) -> Result<AdmissionRecord, AdmissionStoreError> {
        Ok(self.lock().clone())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: AdmissionState,
    ) -> Result<Option<AdmissionRecord>, AdmissionStoreError> {
        let mut record = self.lock();
        if record.version != expected_version {
            return Ok(None);
        }
        *record = AdmissionRecord {
            state: next,
            version: record.version + 1,
        };
        Ok(Some(record.clone()))
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Result of [`AdmissionController::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// This call performed the OPEN → CLOSED transition.
    Closed(AdmissionState),
    /// The gate was already closed; the original reason is kept.
    AlreadyClosed(AdmissionState),
}

/// Result of [`AdmissionController::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Reopened,
    AlreadyOpen,
}

/// The only writer of [`AdmissionState`].
pub struct AdmissionController {
    store: Arc<dyn AdmissionStore>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn AdmissionStore>) -> Self {
        Self { store }
    }

    /// Convenience constructor over a fresh [`InMemoryAdmissionStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAdmissionStore::new()))
    }

    /// Returns `true` while new jobs may be submitted.
    pub async fn is_open(&self) -> Result<bool, AdmissionStoreError> {
        Ok(self.state().await?.is_open())
    }

    /// Returns the current admission state.
    pub async fn state(&self) -> Result<AdmissionState, AdmissionStoreError> {
        Ok(self.store.load().await?.state)
    }

    /// Closes the gate.
    ///
    /// Idempotent: once closed, later calls leave `reason` and `closed_at`
    /// untouched so the first breach stays on record.
    pub async fn close(&self, reason: impl Into<String>) -> Result<CloseOutcome, AdmissionStoreError> {
        let reason = reason.into();
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.load().await?;
            if !current.state.is_open() {
                return Ok(CloseOutcome::AlreadyClosed(current.state));
            }
            let next = AdmissionState::closed(reason.clone(), Timestamp::now());
            if let Some(written) = self.store.compare_and_swap(current.version, next).await? {
                warn!(reason = %reason, version = written.version, "Admission gate closed");
                return Ok(CloseOutcome::Closed(written.state));
            }
        }
        Err(AdmissionStoreError::Contended {
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Reopens the gate. Administrative operation; never called automatically.
    pub async fn reset(&self) -> Result<ResetOutcome, AdmissionStoreError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.load().await?;
            if current.state.is_open() {
                return Ok(ResetOutcome::AlreadyOpen);
            }
            if let Some(written) = self
                .store
                .compare_and_swap(current.version, AdmissionState::open())
                .await?
            {
                info!(
                    previous_reason = current.state.reason.as_deref().unwrap_or(""),
                    version = written.version,
                    "Admission gate reset by operator"
                );
                return Ok(ResetOutcome::Reopened);
            }
        }
        Err(AdmissionStoreError::Contended {
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}
