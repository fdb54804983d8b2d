//! # Codebase Operator Errors
//!
//! Error taxonomies shared across the operator crates.
//!
//! - `GitError`: failures of repository operations, classified so the
//!   reconciler can tell transient conditions from terminal ones
//! - `StoreError`: failures at the object-storage boundary
//!
//! "Already exists" conditions for branches, tags and remotes are not part of
//! the taxonomy: the engine treats them as success.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for repository operations.
pub type GitResult<T> = Result<T, GitError>;

/// Result alias for object-storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Repository operation errors.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("invalid credential: {reason}")]
    InvalidCredential { reason: String },

    #[error("reference not found: {reference}")]
    ReferenceNotFound { reference: String },

    #[error("invalid reference {reference}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("permission denied for {url}: {reason}")]
    PermissionDenied { url: String, reason: String },

    #[error("{operation} failed, remote unreachable: {reason}")]
    Network { operation: String, reason: String },

    #[error("repository already exists at {}", path.display())]
    RepositoryExists { path: PathBuf },

    #[error("repository already initialized at {}", path.display())]
    AlreadyInitialized { path: PathBuf },

    #[error("no repository at {}", path.display())]
    RepositoryNotFound { path: PathBuf },

    #[error("push of {reference} rejected: {reason}")]
    PushRejected { reference: String, reason: String },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("{operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("{operation} failed on {}: {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error
    }
}

impl GitError {
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.to_string()
        }
    }

    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source
        }
    }

    /// Whether a later attempt with the same inputs may succeed.
    ///
    /// Permission failures count as transient: tokens expire and hosts go
    /// down, and the reconciler retries them under backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::Network { .. }
                | Self::PushRejected { .. }
                | Self::Cancelled { .. }
                | Self::Io { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ReferenceNotFound { .. } | Self::RepositoryNotFound { .. }
        )
    }
}

/// Object-storage boundary errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} {key} conflict: {reason}")]
    Conflict {
        kind: String,
        key: String,
        reason: String
    },

    #[error("object storage failed: {reason}")]
    Backend { reason: String }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let denied = GitError::PermissionDenied {
            url: "ssh://git@example.com:22/app".to_string(),
            reason: "authentication required".to_string()
        };
        assert!(denied.is_transient());

        let missing = GitError::ReferenceNotFound {
            reference: "feature/x".to_string()
        };
        assert!(!missing.is_transient());
        assert!(missing.is_not_found());

        let bad_key = GitError::InvalidCredential {
            reason: "not a PEM block".to_string()
        };
        assert!(!bad_key.is_transient());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = GitError::Network {
            operation: "clone https://example.com/app.git".to_string(),
            reason: "connection refused".to_string()
        };
        assert_eq!(
            err.to_string(),
            "clone https://example.com/app.git failed, remote unreachable: connection refused"
        );

        let err = StoreError::NotFound {
            kind: "Codebase".to_string(),
            key: "dev/app".to_string()
        };
        assert_eq!(err.to_string(), "Codebase dev/app not found");
    }
}
