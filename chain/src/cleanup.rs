use std::sync::Arc;

use cb_core::Resource;
use gitops::OpContext;

use crate::error::StepError;
use crate::handler::Cleanup;
use crate::services::Services;

/// Removes the object's working copy once it is being deleted.
pub struct WorkingCopyCleanup {
    services: Arc<Services>
}

impl WorkingCopyCleanup {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

impl<T: Resource> Cleanup<T> for WorkingCopyCleanup {
    fn cleanup(&self, _ctx: &OpContext, object: &T) -> Result<(), StepError> {
        let key = object.key();
        self.services
            .working_copies
            .remove(T::KIND, &key)
            .map_err(|e| StepError::git(format!("remove working copy of {key}"), e))
    }
}
