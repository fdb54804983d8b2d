//! Codebase chain: wait for the git server, put the project on it, then
//! register the default branch.

use std::sync::Arc;

use cb_core::{
    Codebase, CodebaseBranch, CodebaseBranchSpec, CodebaseStrategy, GitProgress, ObjectKey,
    ObjectMeta, Resource
};
use errors::{GitError, StoreError};
use gitops::{OpContext, PUSH_ALL_BRANCHES, PUSH_ALL_TAGS};
use tracing::{debug, info};

use crate::error::StepError;
use crate::handler::{HandlerChain, Outcome, Step};
use crate::repository::{RepositoryAccess, codebase_access, source_auth};
use crate::services::Services;
use crate::cleanup::WorkingCopyCleanup;

const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

pub fn codebase_chain(services: Arc<Services>) -> HandlerChain<Codebase> {
    HandlerChain::new(Codebase::KIND)
        .with_step(CheckGitServer {
            services: Arc::clone(&services)
        })
        .with_step(PutProject {
            services: Arc::clone(&services)
        })
        .with_step(PutDefaultBranch { services })
}

pub fn codebase_cleanup(services: Arc<Services>) -> WorkingCopyCleanup {
    WorkingCopyCleanup::new(services)
}

/// Postpones until the codebase's GitServer exists and is reachable.
pub struct CheckGitServer {
    services: Arc<Services>
}

impl Step<Codebase> for CheckGitServer {
    fn name(&self) -> &'static str {
        "check_git_server"
    }

    fn serve(&self, _ctx: &OpContext, codebase: &mut Codebase) -> Outcome {
        let key = ObjectKey::new(&codebase.meta.namespace, &codebase.spec.git_server);
        match self.services.git_servers.get(&key) {
            Ok(Some(server)) if server.status.connected => Outcome::Success,
            Ok(Some(_)) => {
                info!(git_server = %key, "git server not connected yet");
                Outcome::Postpone(self.services.dependency_delay)
            }
            Ok(None) => {
                info!(git_server = %key, "git server does not exist yet");
                Outcome::Postpone(self.services.dependency_delay)
            }
            Err(e) => Outcome::Failure(StepError::store(format!("load git server {key}"), e))
        }
    }
}

/// Brings the repository on the git server in line with the strategy.
///
/// Progress is recorded in `status.git` so later attempts skip finished
/// work: `initialized` once a local working copy has content, `synced` once
/// the server has it.
pub struct PutProject {
    services: Arc<Services>
}

impl Step<Codebase> for PutProject {
    fn name(&self) -> &'static str {
        "put_project"
    }

    fn serve(&self, ctx: &OpContext, codebase: &mut Codebase) -> Outcome {
        if codebase.status.git == GitProgress::Synced {
            debug!("project already on git server");
            return Outcome::Success;
        }

        let access = match codebase_access(&self.services, codebase) {
            Ok(access) => access,
            Err(e) => return Outcome::Failure(e)
        };
        let result = match codebase.spec.strategy {
            CodebaseStrategy::Create => self.create(ctx, codebase, &access),
            CodebaseStrategy::Clone => self.clone_external(ctx, codebase, &access),
            CodebaseStrategy::Import => self.import(ctx, codebase, &access)
        };
        if result.is_ok() {
            codebase.status.git = GitProgress::Synced;
            info!(strategy = %codebase.spec.strategy, "project synced with git server");
        }
        result.into()
    }
}

impl PutProject {
    fn create(&self, ctx: &OpContext, codebase: &mut Codebase, access: &RepositoryAccess) -> Result<(), StepError> {
        let engine = &self.services.engine;
        let path = self.services.working_copies.path(Codebase::KIND, &codebase.key());
        let key = codebase.key();

        match engine.init(ctx, &path) {
            Ok(()) | Err(GitError::AlreadyInitialized { .. }) => {}
            Err(e) => return Err(StepError::git(format!("init repository for {key}"), e))
        }

        let head = engine
            .head(&path)
            .map_err(|e| StepError::git(format!("inspect repository for {key}"), e))?;
        if head.is_none() {
            let default_branch = &codebase.spec.default_branch;
            let current = engine
                .current_branch(&path)
                .map_err(|e| StepError::git(format!("inspect repository for {key}"), e))?;
            if let Some(current) = current.filter(|current| current != default_branch) {
                engine
                    .rename_branch(ctx, &path, &current, default_branch)
                    .map_err(|e| StepError::git(format!("rename {current} to {default_branch} in {key}"), e))?;
            }

            if !codebase.spec.empty_project {
                let readme = path.join("README.md");
                std::fs::write(&readme, format!("# {}\n", codebase.meta.name)).map_err(|e| {
                    StepError::git(format!("scaffold {key}"), GitError::io("write README", readme, e))
                })?;
            }
            engine
                .commit(ctx, &path, INITIAL_COMMIT_MESSAGE, true)
                .map_err(|e| StepError::git(format!("initial commit for {key}"), e))?;
        }
        codebase.status.git = GitProgress::Initialized;

        publish(self.services.as_ref(), ctx, &path, access, &key)
    }

    fn clone_external(&self, ctx: &OpContext, codebase: &mut Codebase, access: &RepositoryAccess) -> Result<(), StepError> {
        let engine = &self.services.engine;
        let key = codebase.key();
        let path = self.services.working_copies.path(Codebase::KIND, &key);
        let source = codebase
            .spec
            .repository_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| StepError::precondition(format!("clone {key}"), "repositoryUrl is not set"))?;

        if !self.services.working_copies.exists(Codebase::KIND, &key) {
            let auth = source_auth(&self.services, codebase)?;
            engine
                .check_permissions(ctx, auth.as_ref(), &source)
                .map_err(|e| StepError::git(format!("check access to {source}"), e))?;
            engine
                .clone_repository(ctx, auth.as_ref(), &source, &path)
                .map_err(|e| StepError::git(format!("clone {key} from {source}"), e))?;
        }
        codebase.status.git = GitProgress::Initialized;

        publish(self.services.as_ref(), ctx, &path, access, &key)
    }

    fn import(&self, ctx: &OpContext, codebase: &mut Codebase, access: &RepositoryAccess) -> Result<(), StepError> {
        let engine = &self.services.engine;
        let key = codebase.key();
        let path = self.services.working_copies.path(Codebase::KIND, &key);

        engine
            .check_permissions(ctx, access.auth(), &access.url)
            .map_err(|e| StepError::git(format!("check access to {}", access.url), e))?;

        if self.services.working_copies.exists(Codebase::KIND, &key) {
            engine
                .fetch(ctx, access.auth(), &path, None)
                .map_err(|e| StepError::git(format!("fetch {key}"), e))?;
        } else {
            engine
                .clone_repository(ctx, access.auth(), &access.url, &path)
                .map_err(|e| StepError::git(format!("clone {key} from {}", access.url), e))?;
        }
        codebase.status.git = GitProgress::Initialized;

        let branch = &codebase.spec.default_branch;
        engine
            .checkout(ctx, access.auth(), &path, branch, true)
            .map_err(|e| StepError::git(format!("checkout {branch} of {key}"), e))
    }
}

fn publish(
    services: &Services,
    ctx: &OpContext,
    path: &std::path::Path,
    access: &RepositoryAccess,
    key: &ObjectKey
) -> Result<(), StepError> {
    let engine = &services.engine;
    engine
        .add_remote_link(ctx, path, &access.url)
        .map_err(|e| StepError::git(format!("link {key} to {}", access.url), e))?;
    engine
        .push(ctx, access.auth(), path, &[PUSH_ALL_BRANCHES, PUSH_ALL_TAGS])
        .map_err(|e| StepError::git(format!("push {key} to {}", access.url), e))
}

/// Registers the default branch as a CodebaseBranch object.
pub struct PutDefaultBranch {
    services: Arc<Services>
}

impl PutDefaultBranch {
    /// Object name for a codebase's branch: `<codebase>-<branch>` with ref
    /// separators flattened.
    pub fn branch_object_name(codebase: &str, branch: &str) -> String {
        format!("{codebase}-{}", branch.replace('/', "-")).to_lowercase()
    }
}

impl Step<Codebase> for PutDefaultBranch {
    fn name(&self) -> &'static str {
        "put_default_branch"
    }

    fn serve(&self, _ctx: &OpContext, codebase: &mut Codebase) -> Outcome {
        let name = Self::branch_object_name(&codebase.meta.name, &codebase.spec.default_branch);
        let branch = CodebaseBranch {
            meta: ObjectMeta::new(&codebase.meta.namespace, &name),
            spec: CodebaseBranchSpec {
                codebase_name: codebase.meta.name.clone(),
                branch_name: codebase.spec.default_branch.clone(),
                from_commit: None
            },
            status: Default::default()
        };

        match self.services.branches.create(&branch) {
            Ok(()) => {
                info!(branch = %branch.key(), "default branch registered");
                Outcome::Success
            }
            Err(StoreError::Conflict { .. }) => {
                debug!(branch = %branch.key(), "default branch already registered");
                Outcome::Success
            }
            Err(e) => Outcome::Failure(StepError::store(format!("create {}", branch.key()), e))
        }
    }
}
