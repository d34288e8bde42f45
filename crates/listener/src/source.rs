//! Event sources feeding the dispatch queues.
//!
//! - [`pump_lines`] reads newline-delimited JSON envelopes (stdin, a file, a
//!   socket) and forwards the decoded events.
//! - [`spawn_budget_ticker`] requests a budget evaluation on a fixed cadence.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dispatch::{BudgetTrigger, Senders};
use crate::envelope::{decode, Envelope};

/// Counts from one [`pump_lines`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub lines: u64,
    pub arrivals: u64,
    pub statuses: u64,
    pub malformed: u64,
}

/// Reads envelopes line by line until end of input or until the dispatch
/// queues close. Blank lines are skipped; malformed lines, including lines
/// that are not UTF-8, are logged and skipped. Only read failures of the
/// underlying input are returned as errors.
pub async fn pump_lines<R>(mut reader: R, senders: &Senders) -> std::io::Result<PumpStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = PumpStats::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let Ok(text) = std::str::from_utf8(&buf) else {
            stats.lines += 1;
            stats.malformed += 1;
            warn!(line = stats.lines, "Skipping envelope that is not valid UTF-8");
            continue;
        };
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;
        let envelope = match decode(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(line = stats.lines, error = %e, "Skipping malformed envelope");
                stats.malformed += 1;
                continue;
            }
        };
        match envelope {
            Envelope::Arrivals(arrivals) => {
                for arrival in arrivals {
                    if senders.arrivals.send(arrival).await.is_err() {
                        debug!("Arrival queue closed; stopping pump");
                        return Ok(stats);
                    }
                    stats.arrivals += 1;
                }
            }
            Envelope::Status(event) => {
                if senders.statuses.send(event).await.is_err() {
                    debug!("Status queue closed; stopping pump");
                    return Ok(stats);
                }
                stats.statuses += 1;
            }
        }
    }
    info!(
        lines = stats.lines,
        arrivals = stats.arrivals,
        statuses = stats.statuses,
        malformed = stats.malformed,
        "Event input exhausted"
    );
    Ok(stats)
}

/// Sends [`BudgetTrigger::Scheduled`] immediately and then every `every`.
///
/// The task ends when the budget queue closes; abort it to stop earlier.
pub fn spawn_budget_ticker(budget: mpsc::Sender<BudgetTrigger>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if budget.send(BudgetTrigger::Scheduled).await.is_err() {
                debug!("Budget queue closed; stopping ticker");
                break;
            }
        }
    })
}
