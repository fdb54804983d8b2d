//! One reconciliation attempt per call: load, validate, run the chain,
//! persist the outcome.

use std::sync::Arc;
use std::time::Duration;

use cb_core::{ObjectKey, ObjectStore, ReconcileStatus, Resource, StatusPhase};
use chain::{ChainOutcome, Cleanup, HandlerChain, StepError};
use chrono::Utc;
use errors::StoreError;
use gitops::OpContext;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::backoff::BackoffPolicy;
use crate::finalizer::{ensure_finalizers, finalizer_name, remove_finalizer};

/// What the caller should do with the key after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration)
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{action} {key}: {source}")]
    Store {
        action: &'static str,
        key: ObjectKey,
        #[source]
        source: StoreError
    },

    #[error("cleanup of {key}: {source}")]
    Cleanup {
        key: ObjectKey,
        #[source]
        source: StepError
    }
}

/// Object-safe entry point used by the worker pool.
pub trait Reconcile: Send + Sync {
    fn kind(&self) -> &'static str;
    fn reconcile(&self, ctx: &OpContext, key: &ObjectKey) -> Result<Action, ReconcileError>;
}

/// Drives reconciliation of one object kind.
///
/// The failure count in the status grows by one per failed attempt and sets
/// the backoff delay. A postponed attempt keeps it; a completed one writes a
/// fresh status where it starts over.
pub struct ReconcileDriver<T: Resource> {
    store: Arc<dyn ObjectStore<T>>,
    chain: HandlerChain<T>,
    cleanup: Box<dyn Cleanup<T>>,
    backoff: BackoffPolicy,
    finalizer: String
}

impl<T: Resource> ReconcileDriver<T> {
    pub fn new(
        store: Arc<dyn ObjectStore<T>>,
        chain: HandlerChain<T>,
        cleanup: impl Cleanup<T> + 'static,
        backoff: BackoffPolicy
    ) -> Self {
        Self {
            store,
            chain,
            cleanup: Box::new(cleanup),
            backoff,
            finalizer: finalizer_name(T::KIND)
        }
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    fn run(&self, ctx: &OpContext, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let store_error = |action: &'static str, source: StoreError| ReconcileError::Store {
            action,
            key: key.clone(),
            source
        };

        let Some(mut object) = self.store.get(key).map_err(|e| store_error("load", e))? else {
            debug!("object gone, nothing to do");
            return Ok(Action::Done);
        };

        if object.meta().is_being_deleted() {
            return self.finalize(ctx, object);
        }

        if let Err(errors) = object.validate_spec() {
            warn!(error = %errors, "invalid object, not reconciling");
            let status = object.reconcile_status_mut();
            status.phase = StatusPhase::Failed;
            status.message = format!("invalid spec: {errors}");
            status.updated_at = Some(Utc::now());
            self.store
                .update_status(&object)
                .map_err(|e| store_error("update status of", e))?;
            return Ok(Action::Done);
        }

        if ensure_finalizers(object.meta_mut(), &self.finalizer) {
            self.store.update(&object).map_err(|e| store_error("add finalizers to", e))?;
            debug!("finalizers added");
        }

        let previous = object.reconcile_status().failure_count;
        let (status, action) = match self.chain.run(ctx, &mut object) {
            ChainOutcome::Completed => {
                info!("reconciled");
                (
                    ReconcileStatus {
                        phase: StatusPhase::Finished,
                        message: String::new(),
                        failure_count: 0,
                        updated_at: Some(Utc::now())
                    },
                    Action::Done
                )
            }
            ChainOutcome::Postponed { step, delay } => {
                info!(step, delay_ms = delay.as_millis() as u64, "reconciliation postponed");
                (
                    ReconcileStatus {
                        phase: StatusPhase::Postponed,
                        message: format!("{step}: waiting for dependency"),
                        failure_count: previous,
                        updated_at: Some(Utc::now())
                    },
                    Action::RequeueAfter(delay)
                )
            }
            ChainOutcome::Failed { step, error } => {
                let delay = self.backoff.delay(previous);
                error!(
                    step,
                    error = %error,
                    failure_count = previous.saturating_add(1),
                    retry_in_ms = delay.as_millis() as u64,
                    "reconciliation failed"
                );
                (
                    ReconcileStatus {
                        phase: StatusPhase::Failed,
                        message: format!("{step}: {error}"),
                        failure_count: previous.saturating_add(1),
                        updated_at: Some(Utc::now())
                    },
                    Action::RequeueAfter(delay)
                )
            }
        };

        *object.reconcile_status_mut() = status;
        self.store
            .update_status(&object)
            .map_err(|e| store_error("update status of", e))?;
        Ok(action)
    }

    fn finalize(&self, ctx: &OpContext, mut object: T) -> Result<Action, ReconcileError> {
        if !object.meta().has_finalizer(&self.finalizer) {
            debug!("being deleted without our finalizer");
            return Ok(Action::Done);
        }

        let key = object.key();
        self.cleanup
            .cleanup(ctx, &object)
            .map_err(|source| ReconcileError::Cleanup {
                key: key.clone(),
                source
            })?;

        remove_finalizer(object.meta_mut(), &self.finalizer);
        self.store.update(&object).map_err(|source| ReconcileError::Store {
            action: "remove finalizer from",
            key,
            source
        })?;
        info!("cleanup finished, finalizer removed");
        Ok(Action::Done)
    }
}

impl<T: Resource> Reconcile for ReconcileDriver<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn reconcile(&self, ctx: &OpContext, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let ctx = ctx.child(info_span!(
            parent: ctx.span(),
            "reconcile",
            kind = T::KIND,
            namespace = %key.namespace,
            name = %key.name
        ));
        let _enter = ctx.span().enter();
        self.run(&ctx, key)
    }
}
