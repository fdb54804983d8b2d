use errors::{GitError, StoreError};
use thiserror::Error;

/// A failed step, carrying what the step was doing when it failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{action}: {source}")]
    Git {
        action: String,
        #[source]
        source: GitError
    },

    #[error("{action}: {source}")]
    Store {
        action: String,
        #[source]
        source: StoreError
    },

    #[error("{action}: {reason}")]
    Precondition { action: String, reason: String }
}

impl StepError {
    pub fn git(action: impl Into<String>, source: GitError) -> Self {
        Self::Git {
            action: action.into(),
            source
        }
    }

    pub fn store(action: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            action: action.into(),
            source
        }
    }

    pub fn precondition(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Precondition {
            action: action.into(),
            reason: reason.into()
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Git { source, .. } => source.is_transient(),
            Self::Store { .. } => true,
            Self::Precondition { .. } => false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_includes_action_and_cause() {
        let err = StepError::git(
            "push branch release/1.0 of dev/app",
            GitError::PermissionDenied {
                url: "https://git.example.com/app".to_string(),
                reason: "403".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "push branch release/1.0 of dev/app: permission denied for https://git.example.com/app: 403"
        );
        assert!(err.is_transient());
        assert!(!StepError::precondition("resolve secret", "missing token").is_transient());
    }
}
