//! Traits at the object-storage boundary.

use errors::StoreResult;
use validator::{Validate, ValidationErrors};

use crate::types::{
    Codebase, CodebaseBranch, GitServer, GitTag, ObjectKey, ObjectMeta, ReconcileStatus, Secret,
};

/// A reconcilable object kind.
pub trait Resource: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn reconcile_status(&self) -> &ReconcileStatus;
    fn reconcile_status_mut(&mut self) -> &mut ReconcileStatus;

    /// Checks that the fields the chain depends on are present.
    fn validate_spec(&self) -> Result<(), ValidationErrors>;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Typed access to stored objects of one kind.
///
/// `update` persists metadata and spec (finalizers included); `update_status`
/// persists only the status. Implementations complete a deletion once an
/// object marked for deletion no longer carries domain finalizers.
pub trait ObjectStore<T: Resource>: Send + Sync {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<T>>;
    fn create(&self, object: &T) -> StoreResult<()>;
    fn update(&self, object: &T) -> StoreResult<()>;
    fn update_status(&self, object: &T) -> StoreResult<()>;
}

pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>>;
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal, $($status:ident).+) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }

            fn reconcile_status(&self) -> &ReconcileStatus {
                &self.$($status).+
            }

            fn reconcile_status_mut(&mut self) -> &mut ReconcileStatus {
                &mut self.$($status).+
            }

            fn validate_spec(&self) -> Result<(), ValidationErrors> {
                self.spec.validate()
            }
        }
    };
}

impl_resource!(Codebase, "Codebase", status.reconcile);
impl_resource!(CodebaseBranch, "CodebaseBranch", status.reconcile);
impl_resource!(GitTag, "GitTag", status);
impl_resource!(GitServer, "GitServer", status.reconcile);
