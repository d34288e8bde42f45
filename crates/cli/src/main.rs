//! batchgate CLI entry point.
//!
//! This binary is the composition root for the entire system:
//!
//! 1. **Parse configuration**: load `batchgate.toml` (or `--config`) and
//!    validate it before anything starts.
//! 2. **Wire observability**: `tracing-subscriber` with a pretty or JSON
//!    formatter and an optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the admission store, the process job
//!    substrate, notification and alert channels and the cost source, injected
//!    into the [`pipeline`] handlers.
//! 4. **Run the selected command**:
//!    - `run` dispatches newline-delimited trigger envelopes from stdin or a
//!      file, with a budget evaluation on a fixed cadence;
//!    - `submit` feeds one arrival through the gateway and waits for the job;
//!    - `evaluate` runs one budget cycle;
//!    - `status` and `reset` inspect and reopen the admission gate.

mod config;
mod telemetry;
mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use listener::{channels, pump_lines, spawn_budget_ticker, DispatchStats};
use pipeline::{ArrivalEvent, CycleOutcome, ObjectLocation, ResetOutcome, Timestamp};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info, warn};

use crate::config::{BatchgateConfig, LogFormat, DEFAULT_CONFIG_FILE};

#[derive(Debug, Parser)]
#[command(name = "batchgate", version, about = "Budget-gated batch job submission")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `[telemetry] format`.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dispatch trigger envelopes until end of input or Ctrl-C.
    Run {
        /// Read envelopes from this file instead of stdin.
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Submit one artifact, e.g. `s3://input-bucket/runs/sample.cram`.
    Submit { uri: String },
    /// Run one budget evaluation cycle.
    Evaluate,
    /// Print the admission state.
    Status,
    /// Reopen a closed admission gate.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let (path, explicit) = match cli.config {
        Some(path) => (path, true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let mut config = BatchgateConfig::load(&path, explicit)?;
    if let Some(format) = cli.log_format {
        config.telemetry.format = format;
    }

    let guard = telemetry::init(&config.telemetry)?;
    let result = execute(cli.command, &config).await;
    guard.shutdown();
    result
}

async fn execute(command: Command, config: &BatchgateConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run { events } => {
            let stats = match events {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("opening {}", path.display()))?;
                    run(config, BufReader::new(file)).await?
                }
                None => run(config, BufReader::new(tokio::io::stdin())).await?,
            };
            let failed = stats.arrivals.failed + stats.arrivals.panicked;
            Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Submit { uri } => submit(config, &uri).await,
        Command::Evaluate => evaluate(config).await,
        Command::Status => {
            let state = wiring::admission_controller(config).state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset => {
            match wiring::admission_controller(config).reset().await? {
                ResetOutcome::Reopened => println!("admission reopened"),
                ResetOutcome::AlreadyOpen => println!("admission already open"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run<R>(config: &BatchgateConfig, reader: R) -> anyhow::Result<DispatchStats>
where
    R: AsyncBufRead + Unpin,
{
    let (senders, receivers) = channels(config.dispatch.queue_depth);
    let handle = wiring::dispatcher(config, &senders)?.spawn(receivers);
    let ticker = spawn_budget_ticker(senders.budget.clone(), config.budget_interval());

    info!(interval_secs = config.budget.interval_secs, "batchgate running");
    let pumped = tokio::select! {
        pumped = pump_lines(reader, &senders) => pumped.map(|_| ()),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };
    if let Err(e) = &pumped {
        error!(error = %e, "Reading trigger envelopes failed; draining");
    }

    ticker.abort();
    // The ticker owns a budget sender; wait for it to be dropped.
    let _ = ticker.await;
    drop(senders);

    info!("Waiting for in-flight jobs to finish");
    let stats = handle.join().await;
    info!(?stats, "batchgate stopped");
    pumped.context("reading trigger envelopes")?;
    Ok(stats)
}

async fn submit(config: &BatchgateConfig, uri: &str) -> anyhow::Result<ExitCode> {
    let source = ObjectLocation::parse(uri)
        .with_context(|| format!("'{uri}' is not a scheme://container/key location"))?;
    let arrival = ArrivalEvent::for_object(source, Timestamp::now())?;

    let (senders, receivers) = channels(config.dispatch.queue_depth);
    let handle = wiring::dispatcher(config, &senders)?.spawn(receivers);
    senders
        .arrivals
        .send(arrival)
        .await
        .context("dispatcher stopped before accepting the arrival")?;
    drop(senders);

    let stats = handle.join().await.arrivals;
    if stats.submitted == 1 {
        println!("submitted");
        Ok(ExitCode::SUCCESS)
    } else if stats.rejected == 1 {
        println!("rejected: admission closed");
        Ok(ExitCode::FAILURE)
    } else {
        warn!(?stats, "Submission did not complete");
        println!("failed");
        Ok(ExitCode::FAILURE)
    }
}

async fn evaluate(config: &BatchgateConfig) -> anyhow::Result<ExitCode> {
    let admission = wiring::admission_controller(config);
    let monitor = wiring::budget_monitor(config, admission)?;
    match monitor.run_cycle().await {
        CycleOutcome::Skipped { reason } => {
            println!("skipped: {reason}");
            Ok(ExitCode::FAILURE)
        }
        CycleOutcome::Unchanged(snapshot) => {
            println!("unchanged: {}", serde_json::to_string(&snapshot)?);
            Ok(ExitCode::SUCCESS)
        }
        CycleOutcome::Closed { snapshot, reason } => {
            println!("closed: {reason} {}", serde_json::to_string(&snapshot)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
