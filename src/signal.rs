//! Yield-point protocol (§4.E): the suspension signal and the control-flow
//! type transformed code threads it through.
//!
//! Rust has no payload-carrying unwind primitive suitable for user code, so
//! this crate takes the explicit-return branch of §9's design note: a
//! transformed frame is a closure returning `Result<T, Suspending>`, and the
//! `?` operator threads a `Suspending` up through every caller exactly the
//! way a thrown-and-recaught signal would in the source model.

use crate::frame::FrameRecord;
use crate::value::AnyValue;
use std::sync::Arc;

/// The in-band signal raised at a yield point and accumulated by every
/// ancestor frame's catch block on the way out.
///
/// `chain` starts `None` at the innermost frame and gains one
/// [`FrameRecord`] per ancestor as the signal threads upward via `?`.
#[derive(Clone, Debug)]
pub struct Suspending {
    pub yield_point_id: i32,
    pub chain: Option<Arc<FrameRecord>>,
    pub yielded_value: Option<AnyValue>,
}

impl Suspending {
    /// Raised by [`crate::context::ExecutionContext`] at a yield point that
    /// decides to suspend. The chain is empty until an ancestor frame's
    /// catch block prepends its own captured record.
    pub fn new(yield_point_id: i32) -> Self {
        Self {
            yield_point_id,
            chain: None,
            yielded_value: None,
        }
    }

    pub fn with_yielded_value(mut self, value: Option<AnyValue>) -> Self {
        self.yielded_value = value;
        self
    }
}

/// What one step of a transformed, continuable call produces: either a
/// final value or a suspension still unwinding through ancestor frames.
///
/// A transformed frame is naturally expressed as `fn(..) -> Result<T,
/// Suspending>`; `StepOutcome` is the form the [`crate::runner::Runner`]
/// converts that `Result` into at the outermost boundary.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Value(T),
    Suspend(Suspending),
}

impl<T> From<Result<T, Suspending>> for StepOutcome<T> {
    fn from(result: Result<T, Suspending>) -> Self {
        match result {
            Ok(v) => StepOutcome::Value(v),
            Err(s) => StepOutcome::Suspend(s),
        }
    }
}
