//! Runner (§4.F): drives one invocation of a transformed entry point from
//! either a fresh start or a saved continuation, and converts the
//! suspension signal into a `RunOutcome` at the outermost boundary.

use crate::context::{self, ExecutionContext};
use crate::error::ContinuumError;
use crate::frame::ContinuationState;
use crate::registry::EntryPointRegistry;
use crate::signal::Suspending;
use crate::validator::Validator;
use crate::value::AnyValue;
use std::sync::Arc;
use tracing::debug;

/// What one `run`/`resume` call produces.
#[derive(Debug)]
pub enum RunOutcome<T> {
    Completed(T),
    Suspended(Option<AnyValue>, ContinuationState),
}

/// Drives transformed entry points and owns the collaborators a resume
/// needs when the caller doesn't supply an explicit entry: the validator
/// that gates untrusted states and the registry that maps a continuation's
/// outermost method token back to its entry point.
#[derive(Default)]
pub struct Runner {
    pub validator: Validator,
    pub entry_points: EntryPointRegistry,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `entry` from scratch. `entry` is a transformed frame's body,
    /// expressed as the Rust realization of §4.E's contract: a closure
    /// returning `Result<T, Suspending>`.
    pub fn run<T>(&self, entry: impl FnOnce() -> Result<T, Suspending>) -> RunOutcome<T> {
        let ctx = ExecutionContext::fresh();
        context::run_with(ctx, entry).into()
    }

    /// Resumes a previously suspended computation. When `validate` is
    /// true, `state` is checked against the validator before any frame in
    /// it is touched.
    pub fn resume<T>(
        &self,
        state: ContinuationState,
        resume_value: Option<AnyValue>,
        entry: impl FnOnce() -> Result<T, Suspending>,
        validate: bool,
    ) -> Result<RunOutcome<T>, ContinuumError> {
        if validate {
            self.validator.validate(&state)?;
        }
        debug!(depth = ?crate::frame::get_stack_depth(&state.stack_head), "resuming continuation");
        let ctx = ExecutionContext::restoring(state.stack_head, resume_value);
        Ok(context::run_with(ctx, entry).into())
    }

    /// As [`Self::run`], but with an explicit instruction budget and the
    /// remaining budget handed back alongside the outcome — what a caller
    /// that slices execution (the scheduler) needs to account for spend per
    /// slice (§4.J).
    pub fn run_with_budget<T>(
        &self,
        budget: i32,
        entry: impl FnOnce() -> Result<T, Suspending>,
    ) -> (RunOutcome<T>, i32) {
        let ctx = ExecutionContext::fresh_with_budget(budget);
        let outcome = context::run_with(ctx.clone(), entry).into();
        (outcome, ctx.instruction_budget())
    }

    /// As [`Self::resume`], but with an explicit instruction budget and the
    /// remaining budget handed back alongside the outcome.
    pub fn resume_with_budget<T>(
        &self,
        state: ContinuationState,
        resume_value: Option<AnyValue>,
        budget: i32,
        entry: impl FnOnce() -> Result<T, Suspending>,
        validate: bool,
    ) -> Result<(RunOutcome<T>, i32), ContinuumError> {
        if validate {
            self.validator.validate(&state)?;
        }
        debug!(depth = ?crate::frame::get_stack_depth(&state.stack_head), "resuming continuation");
        let ctx = ExecutionContext::restoring_with_budget(state.stack_head, resume_value, budget);
        let outcome = context::run_with(ctx.clone(), entry).into();
        Ok((outcome, ctx.instruction_budget()))
    }

    /// Resumes using the outermost frame's method token to find the entry
    /// point in `entry_points`, for callers that don't have it on hand.
    pub fn resume_registered<T: 'static + Send + Sync>(
        &self,
        state: ContinuationState,
        resume_value: Option<AnyValue>,
        validate: bool,
    ) -> Result<RunOutcome<T>, ContinuumError> {
        let token = state
            .outermost_method_token()
            .ok_or(ContinuumError::UnregisteredEntry(0))?;
        let entry = self
            .entry_points
            .lookup::<T>(token)
            .ok_or(ContinuumError::UnregisteredEntry(token))?;
        let captured_value = resume_value.clone();
        self.resume(
            state,
            resume_value,
            move || Ok(entry(captured_value)),
            validate,
        )
    }
}

impl<T> From<Result<T, Suspending>> for RunOutcome<T> {
    fn from(result: Result<T, Suspending>) -> Self {
        match result {
            Ok(v) => RunOutcome::Completed(v),
            Err(signal) => RunOutcome::Suspended(
                signal.yielded_value,
                ContinuationState::new(signal.chain, None),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{capture_frame, pack_slots};
    use crate::context::ExecutionContext as Ctx;
    use crate::value::AnyValue;

    #[test]
    fn run_completes_without_suspending() {
        let runner = Runner::new();
        let outcome = runner.run(|| -> Result<i64, Suspending> {
            let mut sum = 0i64;
            for i in 1..=10 {
                sum += i;
            }
            Ok(sum)
        });
        assert!(matches!(outcome, RunOutcome::Completed(55)));
    }

    #[test]
    fn run_suspends_on_an_explicit_yield_request() {
        let runner = Runner::new();
        let outcome = runner.run(|| -> Result<i64, Suspending> {
            let ctx = context::ensure_current();
            ctx.request_yield();
            ctx.handle_yield_point(0)?;
            Ok(42)
        });
        match outcome {
            RunOutcome::Suspended(value, state) => {
                assert_eq!(value, None);
                assert!(state.stack_head.is_none());
            }
            RunOutcome::Completed(_) => panic!("expected suspension"),
        }
    }

    #[test]
    fn run_with_budget_reports_remaining_budget_on_completion() {
        let runner = Runner::new();
        let (outcome, remaining) = runner.run_with_budget(10, || -> Result<i64, Suspending> {
            let ctx = context::ensure_current();
            ctx.handle_yield_point_with_budget(0, 3)?;
            Ok(1)
        });
        assert!(matches!(outcome, RunOutcome::Completed(1)));
        assert_eq!(remaining, 7);
    }

    #[test]
    fn resume_with_budget_validates_before_touching_the_state() {
        let runner = Runner::new();
        let frame = capture_frame(0xDEAD_BEEFu32 as i32, 0, vec![], None);
        let state = ContinuationState::new(Some(Arc::new(frame)), None);

        let err = runner
            .resume_with_budget::<i64>(state, None, 5, || Ok(1), true)
            .unwrap_err();
        assert!(matches!(err, ContinuumError::Validation(_)));
    }

    #[test]
    fn resume_continues_a_single_frame_chain_to_completion() {
        let runner = Runner::new();

        // One hoisted frame: token 100, suspended at yield point 0, with a
        // single slot holding the loop counter.
        let frame = capture_frame(100, 0, pack_slots([AnyValue::I64(3)]), None);
        let state = ContinuationState::new(Some(Arc::new(frame)), None);

        let outcome = runner
            .resume::<i64>(
                state,
                None,
                || {
                    let ctx = Ctx::restoring(None, None); // not used: context already installed by resume
                    drop(ctx);
                    let restored = context::current().expect("installed by resume");
                    let chain = restored.restore_chain().expect("one frame");
                    let counter: i64 = crate::capture::get_slot(&chain.slots, 0).unwrap();
                    Ok(counter * 10)
                },
                false,
            )
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(30)));
    }
}
