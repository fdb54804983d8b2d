//! # Reconciler
//!
//! Drives reconciliation attempts for the operator's object kinds.
//!
//! - [`ReconcileDriver`]: one attempt per call. It handles deletion through
//!   finalizers, validates the object, runs the kind's chain and persists the
//!   outcome.
//! - [`BackoffPolicy`]: failure delay derived from the recorded failure count
//! - [`WorkQueue`] / [`run_workers`]: keyed queue that never hands one key to
//!   two workers at once, and the pool draining it
//! - [`Operator`]: everything above wired from [`config::Config`]

pub mod backoff;
pub mod driver;
pub mod finalizer;
pub mod operator;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use driver::{Action, Reconcile, ReconcileDriver, ReconcileError};
pub use finalizer::{ensure_finalizers, finalizer_name, remove_finalizer};
pub use operator::{Operator, Stores};
pub use worker::{WorkQueue, run_workers};
