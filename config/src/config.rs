//! # Configuration Structures
//!
//! All configuration structures use `serde` for (de)serialization and
//! `validator` for input validation. Every section has defaults so a partial
//! file or an empty environment yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Top-level operator configuration.
///
/// ## Usage
/// ```rust,no_run
/// use config::{Config, Validate};
///
/// let config = Config::default();
/// config.validate().expect("defaults are valid");
/// println!("working copies under {}", config.workspace.root.display());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Where working copies live
    #[serde(default)]
    #[validate(nested)]
    pub workspace: WorkspaceConfig,

    /// Git engine settings (commit identity, host keys, probe timeout)
    #[serde(default)]
    #[validate(nested)]
    pub git: GitConfig,

    /// Failure backoff and postponement delays
    #[serde(default)]
    #[validate(nested)]
    pub backoff: BackoffConfig,

    /// Worker pool sizing
    #[serde(default)]
    #[validate(nested)]
    pub worker: WorkerConfig
}

/// Working copy location.
///
/// Each reconciled object gets its own directory below `root`, keyed by kind,
/// namespace and name.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    #[validate(custom(function = "validate_absolute_path"))]
    pub root: PathBuf
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/home/codebase-operator/edp")
}

fn validate_absolute_path(path: &PathBuf) -> Result<(), ValidationError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(ValidationError::new("workspace root must be an absolute path"))
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root()
        }
    }
}

/// Git engine configuration.
///
/// ## Fields
/// - `author_name` / `author_email`: identity stamped on every commit the
///   operator creates
/// - `verify_host_keys`: when false (default) any SSH host key is accepted
/// - `probe_timeout_ms`: connectivity probe timeout, independent of caller
///   deadlines
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct GitConfig {
    #[serde(default = "default_author_name")]
    #[validate(length(min = 1))]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    #[validate(email)]
    pub author_email: String,

    #[serde(default)]
    pub verify_host_keys: bool,

    #[serde(default = "default_probe_timeout_ms")]
    #[validate(range(min = 500, max = 10000))]
    pub probe_timeout_ms: u64
}

fn default_author_name() -> String {
    "codebase".to_string()
}

fn default_author_email() -> String {
    "codebase@edp.local".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            verify_host_keys: false,
            probe_timeout_ms: default_probe_timeout_ms()
        }
    }
}

impl GitConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Requeue delays.
///
/// Failed attempts wait `min_delay_ms` doubled once per recorded failure,
/// capped at `max_delay_ms`. Postponed attempts wait `dependency_delay_ms`
/// and never touch the failure count.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_backoff_bounds"))]
pub struct BackoffConfig {
    #[serde(default = "default_min_delay_ms")]
    #[validate(range(min = 1))]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_dependency_delay_ms")]
    #[validate(range(min = 1))]
    pub dependency_delay_ms: u64
}

fn default_min_delay_ms() -> u64 {
    10_000
}

fn default_max_delay_ms() -> u64 {
    600_000
}

fn default_dependency_delay_ms() -> u64 {
    30_000
}

fn validate_backoff_bounds(config: &BackoffConfig) -> Result<(), ValidationError> {
    if config.max_delay_ms < config.min_delay_ms {
        return Err(ValidationError::new("max_delay_ms must not be below min_delay_ms"));
    }
    Ok(())
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            dependency_delay_ms: default_dependency_delay_ms()
        }
    }
}

impl BackoffConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn dependency_delay(&self) -> Duration {
        Duration::from_millis(self.dependency_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct WorkerConfig {
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 64))]
    pub workers: usize
}

fn default_workers() -> usize {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers()
        }
    }
}
