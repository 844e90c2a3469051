//! Configuration loading from velo.toml
//!
//! Configuration lives in a `velo.toml` file discovered by walking up
//! from the current directory. Every field has a default, so a missing
//! file means a default run.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::RunnerOptions;
use crate::select::{RunOrder, RunPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VeloConfig {
    /// Pass orchestration settings
    #[serde(default)]
    pub run: RunConfig,
    /// Results database settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Worker process settings
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Pass orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Policy: "all", "eod", "last", or a stride ("5")
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Order: "normal", "reverse", or "multires"
    #[serde(default = "default_order")]
    pub order: String,
    /// Ignore revisions before this date (RFC 3339)
    #[serde(default)]
    pub start_date: Option<String>,
    /// Replace existing results instead of skipping them
    #[serde(default)]
    pub overwrite: bool,
    /// Skip revisions the blacklist names
    #[serde(default = "default_true")]
    pub use_blacklist: bool,
    /// Blacklist a revision when this many benchmarks all fail there
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    /// Adaptive timing target per benchmark (e.g. "100ms")
    #[serde(default = "default_target")]
    pub target_duration: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            order: default_order(),
            start_date: None,
            overwrite: false,
            use_blacklist: default_true(),
            failure_threshold: default_failure_threshold(),
            target_duration: default_target(),
        }
    }
}

/// Results database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite results database
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Worker process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Wall-clock budget for one batch (e.g. "1h")
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_policy() -> String {
    "eod".to_string()
}
fn default_order() -> String {
    "normal".to_string()
}
fn default_true() -> bool {
    true
}
fn default_failure_threshold() -> usize {
    5
}
fn default_target() -> String {
    "100ms".to_string()
}
fn default_db_path() -> String {
    "benchmarks.db".to_string()
}
fn default_timeout() -> String {
    "1h".to_string()
}

impl VeloConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Discover `velo.toml` by walking up from the current directory.
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("velo.toml");
            if config_path.exists() {
                return Self::load(&config_path).ok();
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as a TOML string.
    pub fn default_toml() -> String {
        r#"# VeloBench Configuration

[run]
# Which revisions to run: "all", "eod" (last of each day), "last",
# or a stride like "5"
policy = "eod"
# Traversal order: "normal", "reverse", or "multires"
order = "normal"
# Ignore revisions before this date (uncomment to enable)
# start_date = "2023-01-01T00:00:00Z"
# Replace existing results instead of skipping them
overwrite = false
# Skip revisions on the blacklist
use_blacklist = true
# Blacklist a revision when this many benchmarks all fail there
failure_threshold = 5
# Adaptive timing target per benchmark
target_duration = "100ms"

[store]
# SQLite results database
db_path = "benchmarks.db"

[worker]
# Wall-clock budget for one batch in a worker process
timeout = "1h"
"#
        .to_string()
    }

    /// Parse a duration string (e.g. "3s", "500ms", "2m", "1h") to
    /// nanoseconds.
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid duration number: {}", num_part))?;

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(anyhow::anyhow!("unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}

impl RunConfig {
    /// Convert into validated [`RunnerOptions`], failing fast on typos.
    pub fn runner_options(&self) -> anyhow::Result<RunnerOptions> {
        let policy = RunPolicy::parse(&self.policy)?;
        let order = RunOrder::parse(&self.order)?;
        let start_date = match &self.start_date {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| anyhow::anyhow!("invalid start_date {:?}: {}", s, e))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        let target_ns = VeloConfig::parse_duration(&self.target_duration)?;
        Ok(RunnerOptions {
            policy,
            order,
            start_date,
            overwrite: self.overwrite,
            use_blacklist: self.use_blacklist,
            failure_threshold: self.failure_threshold,
            target_duration: Duration::from_nanos(target_ns),
        })
    }
}

/// Parse a worker timeout into a [`Duration`].
pub fn parse_timeout(config: &WorkerConfig) -> anyhow::Result<Duration> {
    Ok(Duration::from_nanos(VeloConfig::parse_duration(
        &config.timeout,
    )?))
}
