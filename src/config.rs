//! Configuration for lamad-courses

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lamad-courses")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the course database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits on the SQLite lock before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Compare-and-set attempts for a single CreateVersion call
    #[serde(default = "default_max_version_retries")]
    pub max_version_retries: u32,

    /// Entries kept in a course's version history summary
    #[serde(default = "default_history_summary_limit")]
    pub history_summary_limit: usize,

    /// Fraction of a lesson's duration that counts as completed
    #[serde(default = "default_completion_ratio")]
    pub completion_ratio: f64,

    /// Days a soft-deleted course can still be restored
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Retention sweep cadence in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Enrollment projector tuning
    #[serde(default)]
    pub projector: ProjectorConfig,
}

/// Enrollment projector fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Enrollment snapshot writes in flight at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Attempts per enrollment within one sync pass
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts (multiplied by attempt number)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How often failed queue entries are re-run
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Reconcile passes before a queue entry is left permanently failed
    #[serde(default = "default_max_reconcile_rounds")]
    pub max_reconcile_rounds: i32,
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_version_retries() -> u32 {
    3
}

fn default_history_summary_limit() -> usize {
    10
}

fn default_completion_ratio() -> f64 {
    0.9
}

fn default_retention_days() -> i64 {
    7
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_max_parallel() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_max_reconcile_rounds() -> i32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_version_retries: default_max_version_retries(),
            history_summary_limit: default_history_summary_limit(),
            completion_ratio: default_completion_ratio(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval(),
            projector: ProjectorConfig::default(),
        }
    }
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            reconcile_interval_secs: default_reconcile_interval(),
            max_reconcile_rounds: default_max_reconcile_rounds(),
        }
    }
}

impl ProjectorConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get course database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("courses.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Reject values the services cannot operate with
    pub fn validate(&self) -> Result<(), crate::error::CourseError> {
        use crate::error::CourseError;

        if self.pool_size == 0 {
            return Err(CourseError::Config("pool_size must be at least 1".into()));
        }
        if !(self.completion_ratio > 0.0 && self.completion_ratio <= 1.0) {
            return Err(CourseError::Config(format!(
                "completion_ratio must be in (0, 1], got {}",
                self.completion_ratio
            )));
        }
        if self.retention_days < 1 {
            return Err(CourseError::Config("retention_days must be at least 1".into()));
        }
        if self.max_version_retries == 0 {
            return Err(CourseError::Config("max_version_retries must be at least 1".into()));
        }
        if self.projector.max_parallel == 0 || self.projector.max_attempts == 0 {
            return Err(CourseError::Config(
                "projector.max_parallel and projector.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
