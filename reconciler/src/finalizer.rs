//! Finalizer markers on reconciled objects.

use cb_core::{FOREGROUND_DELETION, ObjectMeta};

/// Domain finalizer for a kind, e.g. `codebase.operator.finalizer.name`.
pub fn finalizer_name(kind: &str) -> String {
    format!("{}.operator.finalizer.name", kind.to_lowercase())
}

/// Adds the domain finalizer and the foreground-deletion marker.
/// Returns whether the metadata changed.
pub fn ensure_finalizers(meta: &mut ObjectMeta, domain: &str) -> bool {
    let mut changed = false;
    for finalizer in [domain, FOREGROUND_DELETION] {
        if !meta.has_finalizer(finalizer) {
            meta.finalizers.push(finalizer.to_string());
            changed = true;
        }
    }
    changed
}

/// Strips the domain finalizer; the foreground marker stays for storage to
/// handle. Returns whether the metadata changed.
pub fn remove_finalizer(meta: &mut ObjectMeta, domain: &str) -> bool {
    let before = meta.finalizers.len();
    meta.finalizers.retain(|finalizer| finalizer != domain);
    meta.finalizers.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_name() {
        assert_eq!(finalizer_name("CodebaseBranch"), "codebasebranch.operator.finalizer.name");
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut meta = ObjectMeta::new("dev", "app");
        meta.finalizers.push(FOREGROUND_DELETION.to_string());

        assert!(ensure_finalizers(&mut meta, "codebase.operator.finalizer.name"));
        assert!(!ensure_finalizers(&mut meta, "codebase.operator.finalizer.name"));
        assert_eq!(meta.finalizers.len(), 2);
    }

    #[test]
    fn test_remove_keeps_foreground_marker() {
        let mut meta = ObjectMeta::new("dev", "app");
        ensure_finalizers(&mut meta, "gittag.operator.finalizer.name");

        assert!(remove_finalizer(&mut meta, "gittag.operator.finalizer.name"));
        assert!(!remove_finalizer(&mut meta, "gittag.operator.finalizer.name"));
        assert_eq!(meta.finalizers, vec![FOREGROUND_DELETION.to_string()]);
    }
}
