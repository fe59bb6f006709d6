//! Execution context (§4.D): per-worker state consulted and mutated by
//! transformed code at every yield point.
//!
//! `ExecutionContext` is an ordinary owned value a [`crate::runner::Runner`]
//! can thread explicitly into call sites; the `thread_local!` storage below
//! is the convenience form §9 asks for alongside it, for generated code that
//! would rather look the context up than carry it as a parameter.

use crate::frame::FrameRecord;
use crate::signal::Suspending;
use crate::value::AnyValue;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_BUDGET: i32 = 1000;

struct ContextState {
    instruction_budget: i32,
    is_restoring: bool,
    restore_chain: Option<Arc<FrameRecord>>,
    resume_value: Option<AnyValue>,
}

/// A clonable handle onto one worker's suspend/resume bookkeeping. Clones
/// share the same underlying state — cloning does not fork a new context,
/// it hands out another reference to the one currently installed.
#[derive(Clone)]
pub struct ExecutionContext {
    yield_requested: Arc<AtomicBool>,
    state: Rc<RefCell<ContextState>>,
}

impl ExecutionContext {
    /// A context for a first run: not restoring, default budget, no saved
    /// chain or resume value.
    pub fn fresh() -> Self {
        Self::fresh_with_budget(DEFAULT_BUDGET)
    }

    pub fn fresh_with_budget(budget: i32) -> Self {
        Self {
            yield_requested: Arc::new(AtomicBool::new(false)),
            state: Rc::new(RefCell::new(ContextState {
                instruction_budget: budget,
                is_restoring: false,
                restore_chain: None,
                resume_value: None,
            })),
        }
    }

    /// A context primed to resume a previously suspended computation.
    pub fn restoring(restore_chain: Option<Arc<FrameRecord>>, resume_value: Option<AnyValue>) -> Self {
        Self::restoring_with_budget(restore_chain, resume_value, DEFAULT_BUDGET)
    }

    pub fn restoring_with_budget(
        restore_chain: Option<Arc<FrameRecord>>,
        resume_value: Option<AnyValue>,
        budget: i32,
    ) -> Self {
        Self {
            yield_requested: Arc::new(AtomicBool::new(false)),
            state: Rc::new(RefCell::new(ContextState {
                instruction_budget: budget,
                is_restoring: restore_chain.is_some(),
                restore_chain,
                resume_value,
            })),
        }
    }

    pub fn is_restoring(&self) -> bool {
        self.state.borrow().is_restoring
    }

    pub fn set_is_restoring(&self, value: bool) {
        self.state.borrow_mut().is_restoring = value;
    }

    pub fn restore_chain(&self) -> Option<Arc<FrameRecord>> {
        self.state.borrow().restore_chain.clone()
    }

    pub fn set_restore_chain(&self, chain: Option<Arc<FrameRecord>>) {
        self.state.borrow_mut().restore_chain = chain;
    }

    pub fn resume_value(&self) -> Option<AnyValue> {
        self.state.borrow().resume_value.clone()
    }

    pub fn instruction_budget(&self) -> i32 {
        self.state.borrow().instruction_budget
    }

    /// A cross-thread-safe handle that can call [`YieldHandle::request_yield`]
    /// on a context owned by a different worker.
    pub fn yield_handle(&self) -> YieldHandle {
        YieldHandle(self.yield_requested.clone())
    }

    pub fn request_yield(&self) {
        self.yield_requested.store(true, Ordering::SeqCst);
    }

    pub fn reset_budget(&self, n: i32) {
        self.state.borrow_mut().instruction_budget = n;
    }

    /// The hot path: if a yield was requested, clear the flag and raise.
    pub fn handle_yield_point(&self, id: i32) -> Result<(), Suspending> {
        if self.yield_requested.swap(false, Ordering::SeqCst) {
            return Err(Suspending::new(id));
        }
        Ok(())
    }

    /// As [`Self::handle_yield_point`], but also spends `cost` from the
    /// instruction budget and raises once it reaches zero.
    pub fn handle_yield_point_with_budget(&self, id: i32, cost: i32) -> Result<(), Suspending> {
        let budget_exhausted = {
            let mut state = self.state.borrow_mut();
            state.instruction_budget -= cost;
            state.instruction_budget <= 0
        };
        let yield_requested = self.yield_requested.swap(false, Ordering::SeqCst);
        if yield_requested || budget_exhausted {
            return Err(Suspending::new(id));
        }
        Ok(())
    }
}

/// Cross-thread handle for cancelling/interrupting a running continuation
/// from a worker other than the one that owns its [`ExecutionContext`].
#[derive(Clone)]
pub struct YieldHandle(Arc<AtomicBool>);

impl YieldHandle {
    pub fn request_yield(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

thread_local! {
    static CURRENT: RefCell<Option<ExecutionContext>> = RefCell::new(None);
}

/// Snapshot of whatever context is currently installed for this worker, if
/// any. Reading it does not require one to already be installed —
/// transformed code that wants to guarantee one exists should call
/// [`ensure_current`] instead.
pub fn current() -> Option<ExecutionContext> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Returns the installed context, lazily installing a fresh one if none
/// exists yet.
pub fn ensure_current() -> ExecutionContext {
    CURRENT.with(|c| {
        let mut guard = c.borrow_mut();
        if guard.is_none() {
            *guard = Some(ExecutionContext::fresh());
        }
        guard.as_ref().expect("just installed").clone()
    })
}

pub fn request_yield() {
    if let Some(ctx) = current() {
        ctx.request_yield();
    }
}

pub fn handle_yield_point(id: i32) -> Result<(), Suspending> {
    match current() {
        Some(ctx) => ctx.handle_yield_point(id),
        None => Ok(()),
    }
}

pub fn handle_yield_point_with_budget(id: i32, cost: i32) -> Result<(), Suspending> {
    match current() {
        Some(ctx) => ctx.handle_yield_point_with_budget(id, cost),
        None => Ok(()),
    }
}

pub fn reset_budget(n: i32) {
    if let Some(ctx) = current() {
        ctx.reset_budget(n);
    }
}

/// Restores whatever was previously installed the moment it drops, whether
/// that's a normal return or a panic unwinding through `entry`.
struct RestoreGuard {
    previous: Option<ExecutionContext>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| *c.borrow_mut() = self.previous.take());
    }
}

/// Scoped install: `context` becomes current for the duration of `entry`,
/// and whatever was current before is restored on every exit path.
pub fn run_with<T>(context: ExecutionContext, entry: impl FnOnce() -> T) -> T {
    let previous = CURRENT.with(|c| c.borrow_mut().replace(context));
    let _guard = RestoreGuard { previous };
    entry()
}
