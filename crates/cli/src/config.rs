//! `batchgate.toml` configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable local configuration. [`BatchgateConfig::validate`] runs at load
//! time; the process never starts with an invalid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pipeline::{BudgetCeiling, JobDefinitionName, JobQueueName, SubmissionTarget};
use serde::Deserialize;
use thiserror::Error;

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "batchgate.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchgateConfig {
    pub job: JobConfig,
    pub admission: AdmissionConfig,
    pub dedup: DedupConfig,
    pub dispatch: DispatchConfig,
    pub budget: BudgetConfig,
    pub notify: NotifyConfig,
    pub telemetry: TelemetryConfig,
}

/// `[job]`: where jobs go and what runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub queue: String,
    pub definition: String,
    /// Container the job writes its output to (`S3_OUTPUT_BUCKET`).
    pub output_container: Option<String>,
    pub program: String,
    pub args: Vec<String>,
    pub attempts: u32,
    pub timeout_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            queue: "batchgate-queue".into(),
            definition: "batchgate-job".into(),
            output_container: None,
            program: "true".into(),
            args: Vec::new(),
            attempts: batch::DEFAULT_ATTEMPTS,
            timeout_secs: batch::DEFAULT_ATTEMPT_TIMEOUT.as_secs(),
        }
    }
}

/// `[admission]`: where the gate lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "store", rename_all = "snake_case", deny_unknown_fields)]
pub enum AdmissionConfig {
    File { path: PathBuf },
    Memory,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from(".batchgate/admission.json"),
        }
    }
}

/// `[dedup]`: arrival deduplication window. `window_secs = 0` disables it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    pub window_secs: u64,
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: pipeline::DEFAULT_DEDUP_WINDOW.as_secs(),
            capacity: pipeline::DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// `[dispatch]`: queue depth and handler concurrency, per control path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    pub queue_depth: usize,
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_depth: listener::DEFAULT_QUEUE_DEPTH,
            max_in_flight: listener::DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// `[budget]`: ceiling, warning threshold, cadence, and cost source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetConfig {
    /// USD per budget period.
    pub ceiling: f64,
    /// Percentage of the ceiling that triggers a one-time warning; `0` disables.
    pub warn_percent: f64,
    pub interval_secs: u64,
    pub cost_source: CostSourceConfig,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            ceiling: 5.0,
            warn_percent: pipeline::DEFAULT_WARN_PERCENT,
            interval_secs: 24 * 60 * 60,
            cost_source: CostSourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CostSourceConfig {
    File { path: PathBuf },
    Http { url: String },
}

impl Default for CostSourceConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from(".batchgate/spend.json"),
        }
    }
}

/// `[notify]`: job notification channel and optional separate alert channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    pub channel: ChannelConfig,
    /// Defaults to `channel` when absent.
    pub alerts: Option<ChannelConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ChannelConfig {
    #[default]
    Log,
    Webhook {
        url: String,
    },
}

/// `[telemetry]`: log format and optional OTLP export.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl BatchgateConfig {
    /// Loads and validates `path`. A missing file at the default location
    /// yields the defaults; a missing file given explicitly is an error.
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => String::new(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::parse(&text).map_err(|e| match e {
            ParseOrInvalid::Parse(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            ParseOrInvalid::Invalid(e) => e,
        })?;
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self, ParseOrInvalid> {
        let config: Self = toml::from_str(text).map_err(ParseOrInvalid::Parse)?;
        config.validate().map_err(ParseOrInvalid::Invalid)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.submission_target()?;
        self.ceiling()?;
        if self.job.program.trim().is_empty() {
            return Err(invalid("job.program", "must not be empty"));
        }
        if self.job.attempts == 0 {
            return Err(invalid("job.attempts", "must be at least 1"));
        }
        if self.job.timeout_secs == 0 {
            return Err(invalid("job.timeout_secs", "must be at least 1"));
        }
        if self.dispatch.queue_depth == 0 {
            return Err(invalid("dispatch.queue_depth", "must be at least 1"));
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(invalid("dispatch.max_in_flight", "must be at least 1"));
        }
        if self.budget.interval_secs == 0 {
            return Err(invalid("budget.interval_secs", "must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.budget.warn_percent) {
            return Err(invalid("budget.warn_percent", "must be between 0 and 100"));
        }
        if let CostSourceConfig::Http { url } = &self.budget.cost_source {
            check_url("budget.cost_source.url", url)?;
        }
        if let ChannelConfig::Webhook { url } = &self.notify.channel {
            check_url("notify.channel.url", url)?;
        }
        if let Some(ChannelConfig::Webhook { url }) = &self.notify.alerts {
            check_url("notify.alerts.url", url)?;
        }
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            check_url("telemetry.otlp_endpoint", endpoint)?;
        }
        Ok(())
    }

    pub fn submission_target(&self) -> Result<SubmissionTarget, ConfigError> {
        Ok(SubmissionTarget {
            job_queue: JobQueueName::new(self.job.queue.clone())
                .ok_or_else(|| invalid("job.queue", "must not be empty"))?,
            job_definition: JobDefinitionName::new(self.job.definition.clone())
                .ok_or_else(|| invalid("job.definition", "must not be empty"))?,
            output_container: self.job.output_container.clone(),
        })
    }

    pub fn ceiling(&self) -> Result<BudgetCeiling, ConfigError> {
        BudgetCeiling::new(self.budget.ceiling)
            .ok_or_else(|| invalid("budget.ceiling", "must be a finite, non-negative amount"))
    }

    /// Warning threshold, or `None` when disabled.
    pub fn warn_percent(&self) -> Option<f64> {
        (self.budget.warn_percent > 0.0).then_some(self.budget.warn_percent)
    }

    pub fn budget_interval(&self) -> Duration {
        Duration::from_secs(self.budget.interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job.timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup.window_secs)
    }
}

enum ParseOrInvalid {
    Parse(toml::de::Error),
    Invalid(ConfigError),
}

fn check_url(field: &'static str, url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(field, format!("'{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(field, format!("'{url}' is not an http(s) URL")));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid(field, format!("'{url}' has no host")));
    }
    Ok(())
}
