use std::sync::Arc;
use std::time::Duration;

use cb_core::{Codebase, CodebaseBranch, GitServer, ObjectStore, SecretStore};
use gitops::{GitEngine, WorkingCopies};

/// Collaborators shared by every step of every chain.
pub struct Services {
    pub engine: GitEngine,
    pub working_copies: WorkingCopies,
    pub codebases: Arc<dyn ObjectStore<Codebase>>,
    pub branches: Arc<dyn ObjectStore<CodebaseBranch>>,
    pub git_servers: Arc<dyn ObjectStore<GitServer>>,
    pub secrets: Arc<dyn SecretStore>,
    /// How long to wait for a dependency that is not ready yet.
    pub dependency_delay: Duration,
    pub probe_timeout: Duration
}
