//! On-disk working copy layout.

use std::path::{Path, PathBuf};

use cb_core::ObjectKey;
use errors::{GitError, GitResult};

/// Locates per-object working copies under a root directory.
///
/// Layout is `<root>/<kind>/<namespace>/<name>`, so objects of different
/// kinds or namespaces never share a directory. Concurrent use of one path
/// relies on the work queue handing each key to a single worker.
#[derive(Debug, Clone)]
pub struct WorkingCopies {
    root: PathBuf
}

impl WorkingCopies {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, kind: &str, key: &ObjectKey) -> PathBuf {
        self.root
            .join(kind.to_lowercase())
            .join(&key.namespace)
            .join(&key.name)
    }

    /// Whether a repository has been cloned or initialized for the object.
    pub fn exists(&self, kind: &str, key: &ObjectKey) -> bool {
        self.path(kind, key).join(".git").is_dir()
    }

    pub fn remove(&self, kind: &str, key: &ObjectKey) -> GitResult<()> {
        let path = self.path(kind, key);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "working copy removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitError::io("remove working copy", path, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_and_removal() {
        let dir = TempDir::new().unwrap();
        let copies = WorkingCopies::new(dir.path());
        let key = ObjectKey::new("dev", "app");

        let path = copies.path("Codebase", &key);
        assert_eq!(path, dir.path().join("codebase").join("dev").join("app"));
        assert!(!copies.exists("Codebase", &key));

        git2::Repository::init(&path).unwrap();
        assert!(copies.exists("Codebase", &key));
        assert!(!copies.exists("GitTag", &key));

        copies.remove("Codebase", &key).unwrap();
        assert!(!path.exists());
        copies.remove("Codebase", &key).unwrap();
    }
}
