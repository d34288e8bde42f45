//! Bounded recent-arrivals cache used to suppress redelivered arrivals.
//!
//! Keys are claimed before submission and released if submission fails, so a
//! redelivery after a failed submit gets another chance while concurrent
//! duplicates of an in-flight submission are turned away.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ArrivalKey;

/// Arrivals remembered for this long are treated as duplicates.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Upper bound on remembered arrivals. The oldest entry is evicted first,
/// even if still inside the window.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

pub struct ArrivalDeduplicator {
    window: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    seen: HashMap<ArrivalKey, Instant>,
    // Insertion order; may hold stale pairs for keys released or re-claimed.
    order: VecDeque<(ArrivalKey, Instant)>,
}

impl ArrivalDeduplicator {
    /// A zero `window` disables deduplication entirely, leaving it to the
    /// job substrate's own idempotency.
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Claims `key`. Returns `false` if it was already claimed inside the window.
    pub fn claim(&self, key: &ArrivalKey) -> bool {
        self.claim_at(key, Instant::now())
    }

    pub fn claim_at(&self, key: &ArrivalKey, now: Instant) -> bool {
        let mut inner = self.lock();
        self.evict(&mut inner, now);
        if inner.seen.contains_key(key) {
            return false;
        }
        if self.window.is_zero() {
            return true;
        }
        while inner.seen.len() >= self.capacity {
            match inner.order.pop_front() {
                Some((old, at)) => {
                    if inner.seen.get(&old) == Some(&at) {
                        inner.seen.remove(&old);
                    }
                }
                None => break,
            }
        }
        inner.seen.insert(key.clone(), now);
        inner.order.push_back((key.clone(), now));
        true
    }

    /// Forgets `key` so a later redelivery may claim it again.
    pub fn release(&self, key: &ArrivalKey) {
        self.lock().seen.remove(key);
    }

    /// Number of arrivals currently remembered.
    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, inner: &mut Inner, now: Instant) {
        while let Some((key, at)) = inner.order.front() {
            if now.saturating_duration_since(*at) < self.window {
                break;
            }
            if inner.seen.get(key) == Some(at) {
                inner.seen.remove(key);
            }
            inner.order.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ArrivalDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW, DEFAULT_DEDUP_CAPACITY)
    }
}
