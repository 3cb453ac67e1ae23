//! Command-line and environment configuration shared by the binaries.
//!
//! Every option can be given as a flag or through the environment variable
//! named next to it. [`load_dotenv`] should run before parsing so values from
//! a `.env` file act as defaults.

use crate::pipeline::domain::Stage;
use crate::worker::adapters::GeneratorCommand;
use camino::Utf8PathBuf;
use clap::Args;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The generators file could not be read.
    #[error("failed to read generators file {path}: {source}")]
    Read {
        /// File that was read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The generators file is not valid JSON of the expected shape.
    #[error("failed to parse generators file {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: Utf8PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Loads `.env` into the process environment when present.
///
/// # Errors
///
/// Returns the underlying error when a `.env` file exists but cannot be
/// read.
pub fn load_dotenv() -> Result<(), dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(err),
    }
}

/// `PostgreSQL` connection settings.
#[derive(Debug, Clone, Args)]
pub struct DatabaseConfig {
    /// Connection URL of the shared store.
    #[arg(long = "database-url", env = "DATABASE_URL")]
    pub url: String,

    /// Maximum pooled connections.
    #[arg(long = "database-pool-size", env = "DATABASE_POOL_SIZE", default_value_t = 4)]
    pub pool_size: u32,
}

/// Polling intervals and reconciliation thresholds.
#[derive(Debug, Clone, Copy, Args)]
pub struct PollingConfig {
    /// Seconds a stage worker sleeps when its stage has nothing to do.
    #[arg(long = "poll-interval-secs", env = "POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Minutes after which a held stage lock counts as abandoned.
    #[arg(long = "lock-timeout-minutes", env = "LOCK_TIMEOUT_MINUTES", default_value_t = 60)]
    pub lock_timeout_minutes: i64,

    /// Minutes after which a processing row without evidence is a zombie.
    #[arg(
        long = "zombie-threshold-minutes",
        env = "ZOMBIE_THRESHOLD_MINUTES",
        default_value_t = 60
    )]
    pub zombie_threshold_minutes: i64,

    /// Seconds a tracked agent must live before its PID is probed.
    #[arg(long = "min-worker-age-secs", env = "MIN_WORKER_AGE_SECS", default_value_t = 30)]
    pub min_worker_age_secs: i64,

    /// Seconds between recovery passes.
    #[arg(long = "recovery-interval-secs", env = "RECOVERY_INTERVAL_SECS", default_value_t = 60)]
    pub recovery_interval_secs: u64,

    /// Seconds between health passes.
    #[arg(long = "health-interval-secs", env = "HEALTH_INTERVAL_SECS", default_value_t = 300)]
    pub health_interval_secs: u64,

    /// Seconds between worker pool passes.
    #[arg(long = "pool-interval-secs", env = "POOL_INTERVAL_SECS", default_value_t = 10)]
    pub pool_interval_secs: u64,
}

impl PollingConfig {
    /// Returns the worker poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the stage lock timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lock_timeout_minutes)
    }

    /// Returns the zombie threshold.
    #[must_use]
    pub fn zombie_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.zombie_threshold_minutes)
    }

    /// Returns the minimum tracked worker age.
    #[must_use]
    pub fn min_worker_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_worker_age_secs)
    }
}

/// Location of task directories.
#[derive(Debug, Clone, Args)]
pub struct ArtifactConfig {
    /// Root directory holding one directory per task.
    #[arg(long = "tasks-root", env = "TASKS_ROOT", default_value = "tasks")]
    pub tasks_root: Utf8PathBuf,
}

/// External generator programs.
#[derive(Debug, Clone, Args)]
pub struct GeneratorConfig {
    /// JSON file mapping stage names to `{ "program": ..., "args": [...] }`.
    #[arg(long = "generators-file", env = "GENERATORS_FILE")]
    pub generators_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Deserialize)]
struct GeneratorEntry {
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

impl GeneratorConfig {
    /// Reads the per-stage generator commands. No file means no commands.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn load(&self) -> Result<Vec<(Stage, GeneratorCommand)>, ConfigError> {
        let Some(path) = &self.generators_file else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        parse_generators(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }
}

fn parse_generators(raw: &str) -> Result<Vec<(Stage, GeneratorCommand)>, serde_json::Error> {
    let entries: BTreeMap<Stage, GeneratorEntry> = serde_json::from_str(raw)?;
    Ok(entries
        .into_iter()
        .map(|(stage, entry)| (stage, GeneratorCommand::new(entry.program, entry.args)))
        .collect())
}

/// Detached agent launched for open bugs.
#[derive(Debug, Clone, Args)]
pub struct AgentConfig {
    /// Program started for each claimed bug. Without it no agents run.
    #[arg(long = "agent-program", env = "AGENT_PROGRAM")]
    pub program: Option<String>,

    /// Argument templates; `{{ bug_id }}` and `{{ title }}` are available.
    #[arg(long = "agent-arg", env = "AGENT_ARGS", value_delimiter = ' ')]
    pub args: Vec<String>,

    /// Launcher kind recorded as the bug assignee.
    #[arg(long = "agent-kind", env = "AGENT_KIND", default_value = "agent")]
    pub kind: String,

    /// Seconds a launch may take before it is rolled back.
    #[arg(long = "agent-spawn-timeout-secs", env = "AGENT_SPAWN_TIMEOUT_SECS", default_value_t = 30)]
    pub spawn_timeout_secs: u64,

    /// Upper bound on concurrently tracked agents.
    #[arg(long = "agent-max-workers", env = "AGENT_MAX_WORKERS", default_value_t = 10)]
    pub max_workers: usize,
}
