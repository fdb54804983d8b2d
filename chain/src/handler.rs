//! Step abstraction and the fixed per-kind chain.

use std::time::Duration;

use gitops::OpContext;
use tracing::{debug, info, info_span, warn};

use crate::error::StepError;

/// Result of one step.
///
/// `Postpone` is expected control flow ("not yet, retry after this delay")
/// and never counts as a failure.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Postpone(Duration),
    Failure(StepError)
}

impl From<Result<(), StepError>> for Outcome {
    fn from(result: Result<(), StepError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) => Self::Failure(error)
        }
    }
}

/// A unit of reconciliation work for objects of type `T`.
///
/// Steps are not transactional and the chain restarts from the first step
/// on every attempt, so a step must detect work an earlier attempt already
/// did.
pub trait Step<T>: Send + Sync {
    fn name(&self) -> &'static str;
    fn serve(&self, ctx: &OpContext, object: &mut T) -> Outcome;
}

/// Work run when an object carrying the domain finalizer is deleted.
pub trait Cleanup<T>: Send + Sync {
    fn cleanup(&self, ctx: &OpContext, object: &T) -> Result<(), StepError>;
}

/// How a whole chain run ended.
#[derive(Debug)]
pub enum ChainOutcome {
    Completed,
    Postponed { step: &'static str, delay: Duration },
    Failed { step: &'static str, error: StepError }
}

/// An ordered list of steps, assembled once per object kind.
pub struct HandlerChain<T> {
    kind: &'static str,
    steps: Vec<Box<dyn Step<T>>>
}

impl<T> HandlerChain<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            steps: Vec::new()
        }
    }

    pub fn with_step(mut self, step: impl Step<T> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Runs steps in order until one postpones or fails.
    pub fn run(&self, ctx: &OpContext, object: &mut T) -> ChainOutcome {
        for step in &self.steps {
            let name = step.name();
            let step_ctx = ctx.child(info_span!(parent: ctx.span(), "step", kind = self.kind, step = name));
            let _enter = step_ctx.span().enter();

            if step_ctx.is_cancelled() {
                return ChainOutcome::Failed {
                    step: name,
                    error: StepError::git(name, errors::GitError::Cancelled {
                        operation: name.to_string()
                    })
                };
            }

            match step.serve(&step_ctx, object) {
                Outcome::Success => debug!("step completed"),
                Outcome::Postpone(delay) => {
                    info!(delay_ms = delay.as_millis() as u64, "step postponed");
                    return ChainOutcome::Postponed { step: name, delay };
                }
                Outcome::Failure(error) => {
                    warn!(error = %error, "step failed");
                    return ChainOutcome::Failed { step: name, error };
                }
            }
        }
        ChainOutcome::Completed
    }
}

/// Cleanup for kinds without local state.
pub struct NoCleanup;

impl<T> Cleanup<T> for NoCleanup {
    fn cleanup(&self, _ctx: &OpContext, _object: &T) -> Result<(), StepError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        outcome: fn() -> Outcome,
        log: &'static Mutex<Vec<&'static str>>
    }

    impl Step<Vec<&'static str>> for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn serve(&self, _ctx: &OpContext, object: &mut Vec<&'static str>) -> Outcome {
            object.push(self.name);
            self.log.lock().unwrap().push(self.name);
            (self.outcome)()
        }
    }

    fn step(name: &'static str, outcome: fn() -> Outcome, log: &'static Mutex<Vec<&'static str>>) -> Recording {
        Recording { name, outcome, log }
    }

    #[test]
    fn test_runs_all_steps_in_order() {
        static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let chain = HandlerChain::<Vec<&'static str>>::new("Test")
            .with_step(step("first", || Outcome::Success, &LOG))
            .with_step(step("second", || Outcome::Success, &LOG));

        let mut seen = Vec::new();
        assert!(matches!(chain.run(&OpContext::default(), &mut seen), ChainOutcome::Completed));
        assert_eq!(seen, vec!["first", "second"]);
        assert_eq!(chain.step_names(), vec!["first", "second"]);
    }

    #[test]
    fn test_postpone_stops_the_chain() {
        static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let chain = HandlerChain::<Vec<&'static str>>::new("Test")
            .with_step(step("wait", || Outcome::Postpone(Duration::from_secs(30)), &LOG))
            .with_step(step("never", || Outcome::Success, &LOG));

        let mut seen = Vec::new();
        match chain.run(&OpContext::default(), &mut seen) {
            ChainOutcome::Postponed { step, delay } => {
                assert_eq!(step, "wait");
                assert_eq!(delay, Duration::from_secs(30));
            }
            other => panic!("expected postponement, got {other:?}")
        }
        assert_eq!(seen, vec!["wait"]);
    }

    #[test]
    fn test_failure_stops_the_chain() {
        static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let chain = HandlerChain::<Vec<&'static str>>::new("Test")
            .with_step(step(
                "boom",
                || Outcome::Failure(StepError::precondition("boom", "broken")),
                &LOG
            ))
            .with_step(step("never", || Outcome::Success, &LOG));

        let mut seen = Vec::new();
        assert!(matches!(
            chain.run(&OpContext::default(), &mut seen),
            ChainOutcome::Failed { step: "boom", .. }
        ));
        assert_eq!(*LOG.lock().unwrap(), vec!["boom"]);
    }

    #[test]
    fn test_cancelled_context_skips_steps() {
        static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let chain = HandlerChain::<Vec<&'static str>>::new("Test").with_step(step("first", || Outcome::Success, &LOG));
        let ctx = OpContext::default();
        ctx.cancel_handle().cancel();

        let mut seen = Vec::new();
        assert!(matches!(chain.run(&ctx, &mut seen), ChainOutcome::Failed { .. }));
        assert!(seen.is_empty());
    }
}
