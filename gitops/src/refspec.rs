//! Push refspecs.
//!
//! Branch and tag publishing push broadly: every local branch, or every
//! tag, in one call. libgit2 only pushes concrete refspecs, so patterns are
//! expanded against the local reference database first.

use errors::{GitError, GitResult};
use git2::Repository;

pub const PUSH_ALL_BRANCHES: &str = "refs/heads/*:refs/heads/*";
pub const PUSH_ALL_TAGS: &str = "refs/tags/*:refs/tags/*";

/// Expands `src/*:dst/*` patterns into one refspec per matching local ref.
/// Concrete refspecs pass through unchanged; a leading `+` is preserved.
pub fn expand(repo: &Repository, refspecs: &[&str]) -> GitResult<Vec<String>> {
    let mut expanded = Vec::new();

    for refspec in refspecs {
        let (force, body) = match refspec.strip_prefix('+') {
            Some(body) => ("+", body),
            None => ("", *refspec)
        };
        let (src, dst) = body.split_once(':').unwrap_or((body, body));

        let Some(src_prefix) = src.strip_suffix('*') else {
            expanded.push((*refspec).to_string());
            continue;
        };
        let dst_prefix = dst.strip_suffix('*').ok_or_else(|| GitError::InvalidReference {
            reference: (*refspec).to_string(),
            reason: "pattern source requires a pattern destination".to_string()
        })?;

        let references = repo
            .references_glob(src)
            .map_err(|e| GitError::backend(format!("list {src}"), e))?;
        for reference in references {
            let reference = reference.map_err(|e| GitError::backend(format!("list {src}"), e))?;
            let Some(name) = reference.name() else {
                continue;
            };
            let suffix = &name[src_prefix.len()..];
            expanded.push(format!("{force}{name}:{dst_prefix}{suffix}"));
        }
    }

    Ok(expanded)
}
