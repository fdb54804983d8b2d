//! Steps shared by the kinds that work inside a codebase's repository.

use std::sync::Arc;

use cb_core::{Codebase, GitProgress, ObjectKey, Resource};
use gitops::OpContext;
use tracing::{debug, info};

use crate::error::StepError;
use crate::handler::{Outcome, Step};
use crate::repository::{RepositoryAccess, codebase_access};
use crate::services::Services;

/// Loads the parent codebase of an object living in `namespace`.
pub(crate) fn parent_codebase(services: &Services, namespace: &str, name: &str) -> Result<Option<Codebase>, StepError> {
    let key = ObjectKey::new(namespace, name);
    services
        .codebases
        .get(&key)
        .map_err(|e| StepError::store(format!("load codebase {key}"), e))
}

/// Repository access for the parent codebase, which must exist.
pub(crate) fn parent_access(services: &Services, namespace: &str, name: &str) -> Result<RepositoryAccess, StepError> {
    let codebase = parent_codebase(services, namespace, name)?.ok_or_else(|| {
        StepError::precondition(format!("load codebase {namespace}/{name}"), "not found")
    })?;
    codebase_access(services, &codebase)
}

/// Postpones until the parent codebase exists and has been pushed to its
/// git server.
pub struct CheckCodebaseReady<T> {
    services: Arc<Services>,
    codebase_of: fn(&T) -> &str
}

impl<T> CheckCodebaseReady<T> {
    pub fn new(services: Arc<Services>, codebase_of: fn(&T) -> &str) -> Self {
        Self { services, codebase_of }
    }
}

impl<T: Resource> Step<T> for CheckCodebaseReady<T> {
    fn name(&self) -> &'static str {
        "check_codebase_ready"
    }

    fn serve(&self, _ctx: &OpContext, object: &mut T) -> Outcome {
        let namespace = object.meta().namespace.clone();
        let name = (self.codebase_of)(object);
        match parent_codebase(&self.services, &namespace, name) {
            Ok(Some(codebase)) if codebase.status.git == GitProgress::Synced => Outcome::Success,
            Ok(Some(codebase)) => {
                info!(codebase = %codebase.key(), git = %codebase.status.git, "codebase not synced yet");
                Outcome::Postpone(self.services.dependency_delay)
            }
            Ok(None) => {
                info!(codebase = %name, "codebase does not exist yet");
                Outcome::Postpone(self.services.dependency_delay)
            }
            Err(e) => Outcome::Failure(e)
        }
    }
}

/// Clones the parent codebase's repository into the object's working copy,
/// or fetches when one is already there.
pub struct SyncWorkingCopy<T> {
    services: Arc<Services>,
    codebase_of: fn(&T) -> &str
}

impl<T> SyncWorkingCopy<T> {
    pub fn new(services: Arc<Services>, codebase_of: fn(&T) -> &str) -> Self {
        Self { services, codebase_of }
    }
}

impl<T: Resource> Step<T> for SyncWorkingCopy<T> {
    fn name(&self) -> &'static str {
        "sync_working_copy"
    }

    fn serve(&self, ctx: &OpContext, object: &mut T) -> Outcome {
        let key = object.key();
        let access = match parent_access(&self.services, &key.namespace, (self.codebase_of)(object)) {
            Ok(access) => access,
            Err(e) => return Outcome::Failure(e)
        };
        let engine = &self.services.engine;
        let path = self.services.working_copies.path(T::KIND, &key);

        let result = if self.services.working_copies.exists(T::KIND, &key) {
            debug!(path = %path.display(), "working copy present, fetching");
            engine
                .fetch(ctx, access.auth(), &path, None)
                .map_err(|e| StepError::git(format!("fetch {key}"), e))
        } else {
            engine
                .clone_repository(ctx, access.auth(), &access.url, &path)
                .map_err(|e| StepError::git(format!("clone {key} from {}", access.url), e))
        };
        result.into()
    }
}
