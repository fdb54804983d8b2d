//! # Reconciliation chains
//!
//! Each object kind is reconciled by a fixed, ordered list of steps built
//! once at startup:
//!
//! - Codebase: `check_git_server` → `put_project` → `put_default_branch`
//! - CodebaseBranch: `check_codebase_ready` → `sync_working_copy` →
//!   `check_reference` → `push_branch`
//! - GitTag: `check_codebase_ready` → `sync_working_copy` → `push_tag`
//! - GitServer: `check_connection`
//!
//! A step ends in [`Outcome::Success`], [`Outcome::Postpone`] or
//! [`Outcome::Failure`]; the chain stops at the first non-success.

pub mod branch;
pub mod cleanup;
pub mod codebase;
pub mod error;
pub mod gitserver;
pub mod handler;
pub mod repository;
pub mod services;
pub mod shared;
pub mod tag;

pub use branch::{branch_chain, branch_cleanup};
pub use cleanup::WorkingCopyCleanup;
pub use codebase::{codebase_chain, codebase_cleanup};
pub use error::StepError;
pub use gitserver::git_server_chain;
pub use handler::{ChainOutcome, Cleanup, HandlerChain, NoCleanup, Outcome, Step};
pub use repository::{
    RepositoryAccess, codebase_access, remote_url, repository_config, source_auth, source_config
};
pub use services::Services;
pub use tag::{tag_chain, tag_cleanup};
