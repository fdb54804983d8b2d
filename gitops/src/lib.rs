//! # Git Operations
//!
//! In-process (libgit2) repository operations used by the reconciliation
//! chains:
//! - `auth`: credential selection and formatting per hosting provider
//! - `reference`: symbolic name to commit resolution
//! - `engine`: clone/fetch/checkout/commit/push and the idempotent
//!   branch/tag publishing built on them
//! - `working_copy`: on-disk location of per-object repositories
//! - `probe`: fail-fast connectivity checks
//!
//! Every operation takes an [`OpContext`] carrying the caller's tracing span
//! and cancellation state.

pub mod auth;
pub mod context;
pub mod engine;
pub mod probe;
pub mod reference;
pub mod refspec;
pub mod ssh_key;
pub mod working_copy;

pub use auth::{AuthMethod, RepositoryConfig, SshCredential, SshPrivateKey, TokenCredential};
pub use context::{CancelHandle, OpContext};
pub use engine::{GitEngine, ORIGIN};
pub use errors::{GitError, GitResult};
pub use refspec::{PUSH_ALL_BRANCHES, PUSH_ALL_TAGS};
pub use working_copy::WorkingCopies;
