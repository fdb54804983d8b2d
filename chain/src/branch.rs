//! CodebaseBranch chain: wait for the codebase, sync a working copy,
//! validate the start point, then publish the branch.

use std::sync::Arc;

use cb_core::{CodebaseBranch, GitProgress, Resource};
use gitops::OpContext;
use tracing::{debug, info};

use crate::cleanup::WorkingCopyCleanup;
use crate::error::StepError;
use crate::handler::{HandlerChain, Outcome, Step};
use crate::services::Services;
use crate::shared::{CheckCodebaseReady, SyncWorkingCopy, parent_access};

fn codebase_of(branch: &CodebaseBranch) -> &str {
    &branch.spec.codebase_name
}

fn from_commit(branch: &CodebaseBranch) -> &str {
    branch.spec.from_commit.as_deref().unwrap_or_default()
}

pub fn branch_chain(services: Arc<Services>) -> HandlerChain<CodebaseBranch> {
    HandlerChain::new(CodebaseBranch::KIND)
        .with_step(CheckCodebaseReady::new(Arc::clone(&services), codebase_of))
        .with_step(SyncWorkingCopy::new(Arc::clone(&services), codebase_of))
        .with_step(CheckReference {
            services: Arc::clone(&services)
        })
        .with_step(PushBranch { services })
}

pub fn branch_cleanup(services: Arc<Services>) -> WorkingCopyCleanup {
    WorkingCopyCleanup::new(services)
}

/// Fails the attempt when `from_commit` names nothing in the repository.
pub struct CheckReference {
    services: Arc<Services>
}

impl Step<CodebaseBranch> for CheckReference {
    fn name(&self) -> &'static str {
        "check_reference"
    }

    fn serve(&self, ctx: &OpContext, branch: &mut CodebaseBranch) -> Outcome {
        let reference = from_commit(branch);
        if reference.is_empty() {
            debug!("no start point given, branching from HEAD");
            return Outcome::Success;
        }

        let key = branch.key();
        let path = self.services.working_copies.path(CodebaseBranch::KIND, &key);
        self.services
            .engine
            .check_reference(ctx, &path, reference)
            .map_err(|e| StepError::git(format!("check start point of {key}"), e))
            .into()
    }
}

/// Creates the branch at its start point and pushes it.
pub struct PushBranch {
    services: Arc<Services>
}

impl Step<CodebaseBranch> for PushBranch {
    fn name(&self) -> &'static str {
        "push_branch"
    }

    fn serve(&self, ctx: &OpContext, branch: &mut CodebaseBranch) -> Outcome {
        let key = branch.key();
        let access = match parent_access(&self.services, &key.namespace, codebase_of(branch)) {
            Ok(access) => access,
            Err(e) => return Outcome::Failure(e)
        };
        let path = self.services.working_copies.path(CodebaseBranch::KIND, &key);
        let name = &branch.spec.branch_name;

        if let Err(e) = self
            .services
            .engine
            .create_remote_branch(ctx, access.auth(), &path, name, from_commit(branch))
        {
            return Outcome::Failure(StepError::git(format!("push branch {name} of {key}"), e));
        }

        branch.status.git = GitProgress::Synced;
        info!(branch = %name, "branch published");
        Outcome::Success
    }
}
