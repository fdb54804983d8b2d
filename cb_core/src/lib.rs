//! # Codebase Operator Core
//!
//! Shared data model for the lifecycle objects the operator reconciles
//! (Codebase, CodebaseBranch, GitTag, GitServer) and the traits at the
//! object-storage boundary.

pub mod traits;
pub mod types;

pub use traits::{ObjectStore, Resource, SecretStore};
pub use types::*;
