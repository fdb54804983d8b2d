//! # Configuration System
//!
//! Centralized configuration for the codebase operator.
//!
//! This crate provides:
//! - Configuration structures for the git engine, working copies, backoff and
//!   the worker pool
//! - Environment variable loading (12-factor app principles)
//! - Configuration file loading (TOML/YAML)
//! - Configuration validation

pub mod config;
pub mod file_loader;
pub mod loader;

pub use config::{BackoffConfig, Config, GitConfig, WorkerConfig, WorkspaceConfig};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::{ConfigEnvError, load_from_env};
pub use validator::Validate;
