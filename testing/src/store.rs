use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cb_core::{FOREGROUND_DELETION, ObjectKey, ObjectStore, Resource, Secret, SecretStore};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use errors::{StoreError, StoreResult};

type StoredObject = Box<dyn Any + Send + Sync>;

/// Object and secret storage held in memory.
///
/// Mirrors the storage semantics the reconcilers rely on: `create` conflicts
/// on existing keys, `update_status` leaves metadata alone, and an object
/// marked for deletion disappears once only the foreground-deletion marker
/// is left among its finalizers.
#[derive(Default)]
pub struct InMemoryStore {
    objects: DashMap<(&'static str, ObjectKey), StoredObject>,
    secrets: DashMap<ObjectKey, Secret>,
    fail_writes: AtomicBool,
    status_writes: AtomicUsize
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `object` as-is, replacing any previous version.
    pub fn insert<T: Resource>(&self, object: T) {
        self.objects.insert((T::KIND, object.key()), Box::new(object));
    }

    pub fn fetch<T: Resource>(&self, key: &ObjectKey) -> Option<T> {
        self.objects
            .get(&(T::KIND, key.clone()))
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    pub fn contains<T: Resource>(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(&(T::KIND, key.clone()))
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.secrets.insert(secret.key.clone(), secret);
    }

    /// Simulates a user deleting the object. Returns whether it still
    /// exists, i.e. finalizers hold it back.
    pub fn mark_for_deletion<T: Resource>(&self, key: &ObjectKey) -> bool {
        let Some(mut object) = self.fetch::<T>(key) else {
            return false;
        };
        object.meta_mut().deletion_timestamp = Some(chrono::Utc::now());
        self.insert(object.clone());
        self.complete_deletion(&object);
        self.contains::<T>(key)
    }

    /// Makes every subsequent write fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend {
                reason: "injected write failure".to_string()
            });
        }
        Ok(())
    }

    fn complete_deletion<T: Resource>(&self, object: &T) {
        let meta = object.meta();
        if meta.is_being_deleted() && meta.finalizers.iter().all(|f| f == FOREGROUND_DELETION) {
            self.objects.remove(&(T::KIND, object.key()));
            tracing::debug!(kind = T::KIND, key = %object.key(), "object deleted");
        }
    }
}

fn not_found<T: Resource>(key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind: T::KIND.to_string(),
        key: key.to_string()
    }
}

impl<T: Resource> ObjectStore<T> for InMemoryStore {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<T>> {
        Ok(self.fetch(key))
    }

    fn create(&self, object: &T) -> StoreResult<()> {
        self.check_writable()?;
        match self.objects.entry((T::KIND, object.key())) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                kind: T::KIND.to_string(),
                key: object.key().to_string(),
                reason: "already exists".to_string()
            }),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(object.clone()));
                Ok(())
            }
        }
    }

    fn update(&self, object: &T) -> StoreResult<()> {
        self.check_writable()?;
        let key = object.key();
        if !self.contains::<T>(&key) {
            return Err(not_found::<T>(&key));
        }
        self.insert(object.clone());
        self.complete_deletion(object);
        Ok(())
    }

    fn update_status(&self, object: &T) -> StoreResult<()> {
        self.check_writable()?;
        let key = object.key();
        let stored = self.fetch::<T>(&key).ok_or_else(|| not_found::<T>(&key))?;

        let mut updated = object.clone();
        *updated.meta_mut() = stored.meta().clone();
        self.insert(updated);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl SecretStore for InMemoryStore {
    fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        Ok(self.secrets.get(key).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::codebase;
    use cb_core::{Codebase, CodebaseStrategy};

    #[test]
    fn test_create_conflicts_on_existing_key() {
        let store = InMemoryStore::new();
        let app = codebase("dev", "app", CodebaseStrategy::Create, "gerrit");

        ObjectStore::<Codebase>::create(&store, &app).unwrap();
        assert!(matches!(
            ObjectStore::<Codebase>::create(&store, &app),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn test_status_update_keeps_metadata() {
        let store = InMemoryStore::new();
        let mut app = codebase("dev", "app", CodebaseStrategy::Create, "gerrit");
        app.meta.finalizers = vec!["keep".to_string()];
        store.insert(app.clone());

        app.meta.finalizers.clear();
        app.status.reconcile.message = "done".to_string();
        ObjectStore::<Codebase>::update_status(&store, &app).unwrap();

        let stored: Codebase = store.fetch(&app.key()).unwrap();
        assert_eq!(stored.meta.finalizers, vec!["keep".to_string()]);
        assert_eq!(stored.status.reconcile.message, "done");
        assert_eq!(store.status_writes(), 1);
    }

    #[test]
    fn test_deletion_waits_for_domain_finalizers() {
        let store = InMemoryStore::new();
        let mut app = codebase("dev", "app", CodebaseStrategy::Create, "gerrit");
        app.meta.finalizers = vec!["domain".to_string(), FOREGROUND_DELETION.to_string()];
        store.insert(app.clone());

        assert!(store.mark_for_deletion::<Codebase>(&app.key()));

        let mut pending: Codebase = store.fetch(&app.key()).unwrap();
        pending.meta.finalizers.retain(|f| f != "domain");
        ObjectStore::<Codebase>::update(&store, &pending).unwrap();
        assert!(!store.contains::<Codebase>(&app.key()));
    }
}
