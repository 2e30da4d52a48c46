//! Flush configuration layering.
//!
//! Values are resolved in this order, later sources winning:
//! built-in defaults, the config file (`--config`), then command-line
//! flags and their environment variables.

mod duration;

pub use duration::parse_duration;

use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use split_cache::{FailurePolicy, FlushConfig};
use std::path::Path;
use std::time::Duration;

/// A duration in a config file: bare milliseconds or a string such as "2s".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Millis(u64),
    Text(String),
}

impl DurationValue {
    pub fn to_duration(&self) -> anyhow::Result<Duration> {
        match self {
            Self::Millis(ms) => Ok(Duration::from_millis(*ms)),
            Self::Text(s) => parse_duration(s),
        }
    }
}

/// Contents of a TOML, YAML or JSON config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlushFileConfig {
    pub size_threshold: Option<usize>,
    #[serde(alias = "time_threshold_ms")]
    pub time_threshold: Option<DurationValue>,
    #[serde(alias = "poll_interval_ms")]
    pub poll_interval: Option<DurationValue>,
    pub failure_policy: Option<FailurePolicy>,
    pub max_concurrent_flushes: Option<usize>,
    pub partition_batch_size: Option<usize>,
}

impl FlushFileConfig {
    /// Read a config file, picking the format from its extension.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match extension.as_deref() {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config {path:?}")),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config {path:?}")),
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {path:?}")),
            _ => anyhow::bail!(
                "Unsupported config file extension for {path:?}. Expected .toml, .yaml, .yml or .json"
            ),
        }
    }

    pub fn apply(&self, mut config: FlushConfig) -> anyhow::Result<FlushConfig> {
        if let Some(n) = self.size_threshold {
            config.size_threshold = n;
        }
        if let Some(d) = &self.time_threshold {
            config = config.with_time_threshold(d.to_duration().context("time_threshold")?);
        }
        if let Some(d) = &self.poll_interval {
            config = config.with_poll_interval(d.to_duration().context("poll_interval")?);
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(n) = self.max_concurrent_flushes {
            config.max_concurrent_flushes = n;
        }
        if self.partition_batch_size.is_some() {
            config.partition_batch_size = self.partition_batch_size;
        }
        Ok(config)
    }
}

/// Flush tuning flags shared by the subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct FlushArgs {
    /// Aggregate pending message count that triggers a flush
    #[arg(long, env = "SPLIT_FLUSH_SIZE_THRESHOLD")]
    pub size_threshold: Option<usize>,

    /// Time since the last flush that triggers one (e.g. "300ms", "2s")
    #[arg(long, env = "SPLIT_FLUSH_TIME_THRESHOLD")]
    pub time_threshold: Option<String>,

    /// Longest the auto-flush driver sleeps between checks
    #[arg(long, env = "SPLIT_FLUSH_POLL_INTERVAL")]
    pub poll_interval: Option<String>,

    /// What to do with a batch whose sink failed: requeue or drop
    #[arg(long, env = "SPLIT_FLUSH_FAILURE_POLICY")]
    pub failure_policy: Option<FailurePolicy>,

    /// Partitions flushed concurrently
    #[arg(long, env = "SPLIT_FLUSH_MAX_CONCURRENT")]
    pub max_concurrent_flushes: Option<usize>,

    /// Largest batch handed to the sink in one call
    #[arg(long, env = "SPLIT_FLUSH_PARTITION_BATCH_SIZE")]
    pub partition_batch_size: Option<usize>,
}

impl FlushArgs {
    pub fn apply(&self, mut config: FlushConfig) -> anyhow::Result<FlushConfig> {
        if let Some(n) = self.size_threshold {
            config.size_threshold = n;
        }
        if let Some(s) = &self.time_threshold {
            config = config.with_time_threshold(
                parse_duration(s).context("Invalid --time-threshold")?,
            );
        }
        if let Some(s) = &self.poll_interval {
            config = config
                .with_poll_interval(parse_duration(s).context("Invalid --poll-interval")?);
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(n) = self.max_concurrent_flushes {
            config.max_concurrent_flushes = n;
        }
        if self.partition_batch_size.is_some() {
            config.partition_batch_size = self.partition_batch_size;
        }
        Ok(config)
    }
}

/// Load a config file on top of the defaults and validate the result.
pub fn load_flush_config(path: &Path) -> anyhow::Result<FlushConfig> {
    let config = FlushFileConfig::from_path(path)?.apply(FlushConfig::default())?;
    config
        .validate()
        .with_context(|| format!("Invalid flush configuration in {path:?}"))?;
    Ok(config)
}

/// Resolve the effective configuration: defaults, then the optional file,
/// then flags.
pub fn resolve_flush_config(
    path: Option<&Path>,
    args: &FlushArgs,
) -> anyhow::Result<FlushConfig> {
    let base = match path {
        Some(path) => FlushFileConfig::from_path(path)?.apply(FlushConfig::default())?,
        None => FlushConfig::default(),
    };
    let config = args.apply(base)?;
    config.validate().context("Invalid flush configuration")?;
    Ok(config)
}
