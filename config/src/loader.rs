//! # Environment Variable Loader
//!
//! Loads configuration from environment variables following 12-factor app
//! principles. Unset variables fall back to defaults; set but unparsable
//! variables are reported instead of being silently ignored.
//!
//! ## Environment Variables
//! - `CBO_WORKSPACE_ROOT`: working copy root (default:
//!   "/home/codebase-operator/edp")
//! - `CBO_GIT_AUTHOR_NAME`: commit author name (default: "codebase")
//! - `CBO_GIT_AUTHOR_EMAIL`: commit author email (default:
//!   "codebase@edp.local")
//! - `CBO_GIT_VERIFY_HOST_KEYS`: verify SSH host keys (default: false)
//! - `CBO_GIT_PROBE_TIMEOUT_MS`: connectivity probe timeout (default: 3000)
//! - `CBO_BACKOFF_MIN_DELAY_MS`: first failure delay (default: 10000)
//! - `CBO_BACKOFF_MAX_DELAY_MS`: failure delay ceiling (default: 600000)
//! - `CBO_BACKOFF_DEPENDENCY_DELAY_MS`: postponement delay (default: 30000)
//! - `CBO_WORKERS`: worker pool size (default: 3)

use std::env;
use std::str::FromStr;

use crate::config::{BackoffConfig, Config, GitConfig, WorkerConfig, WorkspaceConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigEnvError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String }
}

/// Load configuration from environment variables.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("workers: {}", config.worker.workers);
///     Ok(())
/// }
/// ```
pub fn load_from_env() -> Result<Config, ConfigEnvError> {
    Ok(Config {
        workspace: load_workspace_from_env()?,
        git: load_git_from_env()?,
        backoff: load_backoff_from_env()?,
        worker: load_worker_from_env()?
    })
}

fn load_workspace_from_env() -> Result<WorkspaceConfig, ConfigEnvError> {
    let defaults = WorkspaceConfig::default();
    Ok(WorkspaceConfig {
        root: parse_env_or("CBO_WORKSPACE_ROOT", defaults.root)?
    })
}

fn load_git_from_env() -> Result<GitConfig, ConfigEnvError> {
    let defaults = GitConfig::default();
    Ok(GitConfig {
        author_name: parse_env_or("CBO_GIT_AUTHOR_NAME", defaults.author_name)?,
        author_email: parse_env_or("CBO_GIT_AUTHOR_EMAIL", defaults.author_email)?,
        verify_host_keys: parse_env_or("CBO_GIT_VERIFY_HOST_KEYS", defaults.verify_host_keys)?,
        probe_timeout_ms: parse_env_or("CBO_GIT_PROBE_TIMEOUT_MS", defaults.probe_timeout_ms)?
    })
}

fn load_backoff_from_env() -> Result<BackoffConfig, ConfigEnvError> {
    let defaults = BackoffConfig::default();
    Ok(BackoffConfig {
        min_delay_ms: parse_env_or("CBO_BACKOFF_MIN_DELAY_MS", defaults.min_delay_ms)?,
        max_delay_ms: parse_env_or("CBO_BACKOFF_MAX_DELAY_MS", defaults.max_delay_ms)?,
        dependency_delay_ms: parse_env_or(
            "CBO_BACKOFF_DEPENDENCY_DELAY_MS",
            defaults.dependency_delay_ms
        )?
    })
}

fn load_worker_from_env() -> Result<WorkerConfig, ConfigEnvError> {
    let defaults = WorkerConfig::default();
    Ok(WorkerConfig {
        workers: parse_env_or("CBO_WORKERS", defaults.workers)?
    })
}

fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigEnvError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigEnvError::InvalidValue {
                key: key.to_string(),
                value
            }),
        Err(_) => Ok(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;

    const KEYS: &[&str] = &[
        "CBO_WORKSPACE_ROOT",
        "CBO_GIT_AUTHOR_NAME",
        "CBO_GIT_AUTHOR_EMAIL",
        "CBO_GIT_VERIFY_HOST_KEYS",
        "CBO_GIT_PROBE_TIMEOUT_MS",
        "CBO_BACKOFF_MIN_DELAY_MS",
        "CBO_BACKOFF_MAX_DELAY_MS",
        "CBO_BACKOFF_DEPENDENCY_DELAY_MS",
        "CBO_WORKERS"
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_from_env_defaults() {
        clear_env();
        let config = load_from_env().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_load_from_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("CBO_WORKSPACE_ROOT", "/var/lib/operator");
            env::set_var("CBO_GIT_VERIFY_HOST_KEYS", "true");
            env::set_var("CBO_BACKOFF_MIN_DELAY_MS", "250");
            env::set_var("CBO_WORKERS", "8");
        }

        let config = load_from_env().unwrap();
        assert_eq!(config.workspace.root, PathBuf::from("/var/lib/operator"));
        assert!(config.git.verify_host_keys);
        assert_eq!(config.backoff.min_delay_ms, 250);
        assert_eq!(config.worker.workers, 8);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_value_is_reported() {
        clear_env();
        unsafe {
            env::set_var("CBO_WORKERS", "many");
        }

        let err = load_from_env().unwrap_err();
        assert!(err.to_string().contains("CBO_WORKERS"));

        clear_env();
    }
}
