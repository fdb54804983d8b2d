//! Shared test fixtures for the codebase operator workspace.
//!
//! - [`RemoteFixture`]: a bare repository on disk, reachable over `file://`,
//!   standing in for a git server
//! - [`InMemoryStore`]: object and secret storage with finalizer-gated
//!   deletion
//! - builders for sample objects
//!
//! Fixtures own their temporary directories and clean up on drop.

mod builders;
mod remote;
mod store;

pub use builders::*;
pub use remote::RemoteFixture;
pub use store::InMemoryStore;
