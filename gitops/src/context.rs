//! Call-scoped operation context.
//!
//! An [`OpContext`] is created per reconciliation attempt and handed down to
//! every step and git operation. It carries the tracing span that operations
//! parent their own spans on, plus a cancel flag and optional deadline that
//! libgit2 callbacks poll during network transfers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use errors::{GitError, GitResult};
use tracing::Span;

#[derive(Debug, Clone)]
pub struct OpContext {
    span: Span,
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new(Span::none())
    }
}

impl OpContext {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Shares the cancel flag and deadline with the parent context.
    pub fn child(&self, span: Span) -> Self {
        Self {
            span,
            cancelled: Arc::clone(&self.cancelled),
            deadline: self.deadline
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails with `Cancelled` once the flag is set or the deadline passed.
    pub fn ensure_active(&self, operation: &str) -> GitResult<()> {
        if self.is_cancelled() {
            return Err(GitError::Cancelled {
                operation: operation.to_string()
            });
        }
        Ok(())
    }
}

/// Cancels every context sharing the flag, e.g. on shutdown.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_children() {
        let ctx = OpContext::default();
        let child = ctx.child(Span::none());
        assert!(child.ensure_active("fetch").is_ok());

        ctx.cancel_handle().cancel();
        assert!(child.is_cancelled());
        assert!(matches!(
            child.ensure_active("fetch"),
            Err(GitError::Cancelled { operation }) if operation == "fetch"
        ));
    }

    #[test]
    fn test_expired_deadline_counts_as_cancelled() {
        let ctx = OpContext::default().with_deadline(Instant::now());
        assert!(ctx.is_cancelled());

        let ctx = OpContext::default().with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_cancelled());
    }
}
