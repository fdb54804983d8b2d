//! Symbolic reference resolution.
//!
//! Order, first match wins:
//! 1. empty string: the commit HEAD points at
//! 2. a local branch of that name: its tip
//! 3. a hex commit id (full or unambiguous prefix) present in the object database
//!
//! Anything else is `ReferenceNotFound`. Branches are consulted before
//! hashes, so a branch named like a commit id shadows the commit.

use errors::{GitError, GitResult};
use git2::{BranchType, ObjectType, Oid, Repository};

const MIN_HASH_PREFIX: usize = 4;
const MAX_HASH_LEN: usize = 64;

pub fn resolve(repo: &Repository, reference: &str) -> GitResult<Oid> {
    if reference.is_empty() {
        return repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map(|commit| commit.id())
            .map_err(|_| not_found("HEAD"));
    }

    if let Ok(branch) = repo.find_branch(reference, BranchType::Local) {
        let commit = branch
            .get()
            .peel_to_commit()
            .map_err(|e| GitError::backend(format!("peel branch {reference}"), e))?;
        return Ok(commit.id());
    }

    if looks_like_hash(reference) {
        if let Ok(object) = repo.find_object_by_prefix(reference, Some(ObjectType::Commit)) {
            return Ok(object.id());
        }
    }

    Err(not_found(reference))
}

pub(crate) fn looks_like_hash(reference: &str) -> bool {
    (MIN_HASH_PREFIX..=MAX_HASH_LEN).contains(&reference.len())
        && reference.chars().all(|c| c.is_ascii_hexdigit())
}

fn not_found(reference: &str) -> GitError {
    GitError::ReferenceNotFound {
        reference: reference.to_string()
    }
}
