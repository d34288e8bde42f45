//! Channel-based dispatch of the three control paths.
//!
//! Each path (arrivals, job status events, budget triggers) has its own
//! bounded queue and its own loop. Every event received is handled in a
//! fresh task, so handlers share no call stack and a panic or slow publish in
//! one path never blocks or corrupts another.
//!
//! A loop stops taking events from its queue while `max_in_flight` handlers
//! are running, so a slow handler pushes back on producers through the
//! bounded queue.
//!
//! The loops end once every sender of their queue is dropped and all
//! in-flight tasks have finished; [`DispatcherHandle::join`] then returns the
//! per-path tallies.

use std::future::Future;
use std::sync::Arc;

use pipeline::{
    ArrivalEvent, ArrivalOutcome, BudgetMonitor, CycleOutcome, EventRouter, GatewayError,
    JobStatusEvent, RouteOutcome, SubmissionGateway,
};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info};

/// Default depth of each dispatch queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Default limit on concurrently running handlers, per path.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Why a budget evaluation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetTrigger {
    /// Fixed-cadence tick.
    Scheduled,
    /// The cost source signalled fresh data.
    CostUpdate,
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// Producer side of the dispatch queues. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Senders {
    pub arrivals: mpsc::Sender<ArrivalEvent>,
    pub statuses: mpsc::Sender<JobStatusEvent>,
    pub budget: mpsc::Sender<BudgetTrigger>,
}

/// Consumer side of the dispatch queues, handed to [`Dispatcher::spawn`].
#[derive(Debug)]
pub struct Receivers {
    pub(crate) arrivals: mpsc::Receiver<ArrivalEvent>,
    pub(crate) statuses: mpsc::Receiver<JobStatusEvent>,
    pub(crate) budget: mpsc::Receiver<BudgetTrigger>,
}

/// Creates the three dispatch queues, each `depth` events deep.
pub fn channels(depth: usize) -> (Senders, Receivers) {
    let depth = depth.max(1);
    let (arrivals_tx, arrivals_rx) = mpsc::channel(depth);
    let (statuses_tx, statuses_rx) = mpsc::channel(depth);
    let (budget_tx, budget_rx) = mpsc::channel(depth);
    (
        Senders {
            arrivals: arrivals_tx,
            statuses: statuses_tx,
            budget: budget_tx,
        },
        Receivers {
            arrivals: arrivals_rx,
            statuses: statuses_rx,
            budget: budget_rx,
        },
    )
}

// ---------------------------------------------------------------------------
// Tallies
// ---------------------------------------------------------------------------

trait Tally<O> {
    fn record(&mut self, outcome: O);
    fn record_panic(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrivalStats {
    pub submitted: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl Tally<Result<ArrivalOutcome, GatewayError>> for ArrivalStats {
    fn record(&mut self, outcome: Result<ArrivalOutcome, GatewayError>) {
        match outcome {
            Ok(ArrivalOutcome::Submitted { .. }) => self.submitted += 1,
            Ok(ArrivalOutcome::Rejected { .. }) => self.rejected += 1,
            Ok(ArrivalOutcome::Duplicate { .. }) => self.duplicates += 1,
            Err(_) => self.failed += 1,
        }
    }

    fn record_panic(&mut self) {
        self.panicked += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub published: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub panicked: u64,
}

impl Tally<RouteOutcome> for RouteStats {
    fn record(&mut self, outcome: RouteOutcome) {
        match outcome {
            RouteOutcome::Published(_) => self.published += 1,
            RouteOutcome::Ignored => self.ignored += 1,
            RouteOutcome::Dropped { .. } => self.dropped += 1,
        }
    }

    fn record_panic(&mut self) {
        self.panicked += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetStats {
    pub unchanged: u64,
    pub closed: u64,
    pub skipped: u64,
    pub panicked: u64,
}

impl Tally<CycleOutcome> for BudgetStats {
    fn record(&mut self, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Unchanged(_) => self.unchanged += 1,
            CycleOutcome::Closed { .. } => self.closed += 1,
            CycleOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    fn record_panic(&mut self) {
        self.panicked += 1;
    }
}

/// Per-path tallies returned by [`DispatcherHandle::join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub arrivals: ArrivalStats,
    pub statuses: RouteStats,
    pub budget: BudgetStats,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owns the three handlers and runs one loop per path.
pub struct Dispatcher {
    gateway: Arc<SubmissionGateway>,
    router: Arc<EventRouter>,
    monitor: Arc<BudgetMonitor>,
    max_in_flight: usize,
}

/// Running dispatcher.
pub struct DispatcherHandle {
    arrivals: JoinHandle<ArrivalStats>,
    statuses: JoinHandle<RouteStats>,
    budget: JoinHandle<BudgetStats>,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<SubmissionGateway>,
        router: Arc<EventRouter>,
        monitor: Arc<BudgetMonitor>,
    ) -> Self {
        Self {
            gateway,
            router,
            monitor,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Limits concurrently running handlers on each path. At least one
    /// handler always runs.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Starts the three dispatch loops on the current runtime.
    pub fn spawn(self, receivers: Receivers) -> DispatcherHandle {
        let Receivers {
            arrivals,
            statuses,
            budget,
        } = receivers;

        let limit = self.max_in_flight;
        let gateway = self.gateway;
        let arrivals = tokio::spawn(drive(arrivals, limit, ArrivalStats::default(), move |event| {
            let gateway = gateway.clone();
            async move { gateway.on_arrival(event).await }
        }));

        let router = self.router;
        let statuses = tokio::spawn(drive(statuses, limit, RouteStats::default(), move |event| {
            let router = router.clone();
            async move { router.on_job_status_event(&event).await }
        }));

        let monitor = self.monitor;
        let budget = tokio::spawn(drive(budget, limit, BudgetStats::default(), move |trigger| {
            let monitor = monitor.clone();
            async move {
                info!(?trigger, "Budget evaluation triggered");
                monitor.run_cycle().await
            }
        }));

        DispatcherHandle {
            arrivals,
            statuses,
            budget,
        }
    }
}

impl DispatcherHandle {
    /// Waits for all three loops to drain. Returns once every [`Senders`]
    /// clone has been dropped and in-flight handlers have finished.
    pub async fn join(self) -> DispatchStats {
        DispatchStats {
            arrivals: settle(self.arrivals.await),
            statuses: settle(self.statuses.await),
            budget: settle(self.budget.await),
        }
    }
}

fn settle<S: Default>(joined: Result<S, JoinError>) -> S {
    joined.unwrap_or_else(|e| {
        error!(error = %e, "Dispatch loop terminated abnormally");
        S::default()
    })
}

async fn drive<E, O, S, H, Fut>(
    mut rx: mpsc::Receiver<E>,
    max_in_flight: usize,
    mut stats: S,
    handler: H,
) -> S
where
    E: Send + 'static,
    O: Send + 'static,
    S: Tally<O>,
    H: Fn(E) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
{
    let limit = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            next = next_event(&mut rx, &limit) => match next {
                Some((permit, event)) => {
                    let handled = handler(event);
                    in_flight.spawn(async move {
                        let outcome = handled.await;
                        drop(permit);
                        outcome
                    });
                }
                None => break,
            },
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                finish(&mut stats, done);
            }
        }
    }
    while let Some(done) = in_flight.join_next().await {
        finish(&mut stats, done);
    }
    stats
}

/// Waits for a free handler slot, then for the next event.
async fn next_event<E>(
    rx: &mut mpsc::Receiver<E>,
    limit: &Arc<Semaphore>,
) -> Option<(OwnedSemaphorePermit, E)> {
    let permit = limit.clone().acquire_owned().await.ok()?;
    let event = rx.recv().await?;
    Some((permit, event))
}

fn finish<O, S: Tally<O>>(stats: &mut S, done: Result<O, JoinError>) {
    match done {
        Ok(outcome) => stats.record(outcome),
        Err(e) => {
            error!(error = %e, "Event handler panicked");
            stats.record_panic();
        }
    }
}
