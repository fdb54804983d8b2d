//! GitTag chain: wait for the codebase, sync a working copy, then tag the
//! branch tip and push tags.

use std::sync::Arc;

use cb_core::{GitTag, Resource};
use gitops::OpContext;
use tracing::info;

use crate::cleanup::WorkingCopyCleanup;
use crate::error::StepError;
use crate::handler::{HandlerChain, Outcome, Step};
use crate::services::Services;
use crate::shared::{CheckCodebaseReady, SyncWorkingCopy, parent_access};

fn codebase_of(tag: &GitTag) -> &str {
    &tag.spec.codebase
}

pub fn tag_chain(services: Arc<Services>) -> HandlerChain<GitTag> {
    HandlerChain::new(GitTag::KIND)
        .with_step(CheckCodebaseReady::new(Arc::clone(&services), codebase_of))
        .with_step(SyncWorkingCopy::new(Arc::clone(&services), codebase_of))
        .with_step(PushTag { services })
}

pub fn tag_cleanup(services: Arc<Services>) -> WorkingCopyCleanup {
    WorkingCopyCleanup::new(services)
}

pub struct PushTag {
    services: Arc<Services>
}

impl Step<GitTag> for PushTag {
    fn name(&self) -> &'static str {
        "push_tag"
    }

    fn serve(&self, ctx: &OpContext, tag: &mut GitTag) -> Outcome {
        let key = tag.key();
        let access = match parent_access(&self.services, &key.namespace, codebase_of(tag)) {
            Ok(access) => access,
            Err(e) => return Outcome::Failure(e)
        };
        let path = self.services.working_copies.path(GitTag::KIND, &key);
        let spec = &tag.spec;

        let result = self
            .services
            .engine
            .create_remote_tag(ctx, access.auth(), &path, &spec.branch, &spec.tag)
            .map_err(|e| StepError::git(format!("push tag {} on {} of {key}", spec.tag, spec.branch), e));
        if result.is_ok() {
            info!(tag = %spec.tag, branch = %spec.branch, "tag published");
        }
        result.into()
    }
}
