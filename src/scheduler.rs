//! Cooperative scheduler (§4.J): round-robins many continuations on one
//! worker, giving each a budgeted slice per tick and re-enqueuing it
//! `priority` times while it remains runnable.

use crate::error::ContinuumError;
use crate::frame::ContinuationState;
use crate::runner::{RunOutcome, Runner};
use crate::signal::Suspending;
use crate::value::AnyValue;
use anyhow::Context;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, debug_span, error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub budget_per_slice: i32,
    pub default_priority: u8,
    /// Whether a saved state is run through [`crate::validator::Validator`]
    /// before being resumed (§3.1). Off only for trusted, in-process state
    /// that never crossed a serialization boundary.
    pub validate_resumed_states: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            budget_per_slice: 1000,
            default_priority: 1,
            validate_resumed_states: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptState {
    Ready,
    Running,
    Suspended,
    Waiting,
    Completed,
    Failed,
}

/// One event the scheduler fires while ticking. Handlers receive these
/// synchronously inside a short critical section and must not call back
/// into the scheduler (no re-entrancy, §5).
#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    StateChanged { script_id: u32, state: ScriptState },
    Yielded { script_id: u32, value: Option<AnyValue> },
    Completed { script_id: u32, result: Option<AnyValue> },
    Failed { script_id: u32, error: String },
}

type Entry = Arc<dyn Fn() -> Result<AnyValue, Suspending> + Send + Sync>;

pub struct ScriptInstance {
    pub id: u32,
    pub name: String,
    pub state: ScriptState,
    pub continuation_state: Option<ContinuationState>,
    pub last_yielded_value: Option<AnyValue>,
    pub result: Option<AnyValue>,
    pub error: Option<String>,
    pub yield_count: u32,
    pub tick_count: i64,
    pub priority: u8,
    entry: Entry,
}

struct Inner {
    scripts: Vec<ScriptInstance>,
    run_queue: VecDeque<u32>,
    next_id: u32,
    stop_requested: bool,
}

/// Cooperative round-robin scheduler. `scripts`/`run_queue` live behind one
/// mutex; critical sections are kept short (enqueue/dequeue, state
/// transitions, event dispatch) per §5's concurrency model. Every tick is
/// driven through `runner`, so a resumed state always passes through
/// [`crate::validator::Validator`] the same way a direct `Runner::resume`
/// caller's would (§4.J step 4).
pub struct Scheduler {
    pub config: SchedulerConfig,
    runner: Runner,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Box<dyn Fn(&SchedulerEvent) + Send + Sync>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_runner(config, Runner::default())
    }

    /// As [`Self::new`], but with a caller-supplied `Runner` — for when the
    /// host wants its own pre-populated `Validator`/`EntryPointRegistry`
    /// rather than the defaults.
    pub fn with_runner(config: SchedulerConfig, runner: Runner) -> Self {
        Self {
            config,
            runner,
            inner: Mutex::new(Inner {
                scripts: Vec::new(),
                run_queue: VecDeque::new(),
                next_id: 0,
                stop_requested: false,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn on_event(&self, listener: impl Fn(&SchedulerEvent) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    fn fire(&self, event: SchedulerEvent) {
        match &event {
            SchedulerEvent::Failed { error, .. } => error!(%error, "script failed"),
            SchedulerEvent::Yielded { .. } => debug!("script yielded"),
            _ => debug!("scheduler event"),
        }
        for listener in self.listeners.lock().unwrap().iter() {
            listener(&event);
        }
    }

    pub fn add_script(
        &self,
        entry: Entry,
        name: impl Into<String>,
        priority: Option<u8>,
    ) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        let priority = priority.unwrap_or(self.config.default_priority).max(1);
        inner.scripts.push(ScriptInstance {
            id,
            name: name.into(),
            state: ScriptState::Ready,
            continuation_state: None,
            last_yielded_value: None,
            result: None,
            error: None,
            yield_count: 0,
            tick_count: 0,
            priority,
            entry,
        });
        inner.run_queue.push_back(id);
        id
    }

    pub fn remove_script(&self, script_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.retain(|s| s.id != script_id);
        inner.run_queue.retain(|id| *id != script_id);
    }

    pub fn stop(&self) {
        self.inner.lock().unwrap().stop_requested = true;
    }

    /// Moves a `Waiting` script back into rotation with a resume value.
    pub fn wake(&self, script_id: u32, value: Option<AnyValue>) {
        let mut inner = self.inner.lock().unwrap();
        let priority = {
            let Some(script) = inner.scripts.iter_mut().find(|s| s.id == script_id) else {
                return;
            };
            if script.state != ScriptState::Waiting {
                return;
            }
            script.state = ScriptState::Suspended;
            script.last_yielded_value = value;
            script.priority
        };
        for _ in 0..priority {
            inner.run_queue.push_back(script_id);
        }
    }

    /// Removes a `Suspended` script from rotation until `wake` is called.
    pub fn suspend_to_wait(&self, script_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(script) = inner.scripts.iter_mut().find(|s| s.id == script_id) {
            if script.state == ScriptState::Suspended {
                script.state = ScriptState::Waiting;
            }
        }
        inner.run_queue.retain(|id| *id != script_id);
    }

    /// Runs one slice of work. Returns `false` if there was nothing
    /// runnable (the caller should back off before ticking again).
    pub fn tick(&self) -> bool {
        let (script_id, priority) = {
            let mut inner = self.inner.lock().unwrap();
            loop {
                if inner.run_queue.is_empty() {
                    let runnable: Vec<(u32, u8)> = inner
                        .scripts
                        .iter()
                        .filter(|s| matches!(s.state, ScriptState::Ready | ScriptState::Suspended))
                        .map(|s| (s.id, s.priority))
                        .collect();
                    if runnable.is_empty() {
                        return false;
                    }
                    for (id, priority) in runnable {
                        for _ in 0..priority {
                            inner.run_queue.push_back(id);
                        }
                    }
                }
                let Some(script_id) = inner.run_queue.pop_front() else {
                    return false;
                };
                if let Some(script) = inner.scripts.iter().find(|s| s.id == script_id) {
                    break (script_id, script.priority);
                }
                // Removed mid-rotation: drop it and try the next queued id.
            }
        };

        let span = debug_span!("scheduler.tick", script_id, priority);
        let _enter = span.enter();

        self.set_state(script_id, ScriptState::Running);

        let (entry, saved_state, resume_value) = match self.snapshot_script(script_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // `remove_script` raced us between dequeue and here. Not a
                // validator/caller-facing error — just skip this slice.
                warn!(script_id, error = %e, "script vanished before its slice ran");
                return true;
            }
        };

        let budget = self.config.budget_per_slice;
        let driven: Result<(RunOutcome<AnyValue>, i32), ContinuumError> = match saved_state {
            None => Ok(self.runner.run_with_budget(budget, || (entry)())),
            Some(state) => self.runner.resume_with_budget(
                state,
                resume_value,
                budget,
                || (entry)(),
                self.config.validate_resumed_states,
            ),
        };

        let (outcome, remaining_budget) = match driven {
            Ok(pair) => pair,
            Err(validation_error) => {
                self.fail(script_id, validation_error.to_string());
                return true;
            }
        };
        let spent = budget - remaining_budget;

        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(script) = inner.scripts.iter_mut().find(|s| s.id == script_id) {
                script.tick_count += spent.max(0) as i64;
            }
        }

        match outcome {
            RunOutcome::Completed(result) => {
                let mut inner = self.inner.lock().unwrap();
                if let Some(script) = inner.scripts.iter_mut().find(|s| s.id == script_id) {
                    script.result = Some(result.clone());
                    script.continuation_state = None;
                    script.state = ScriptState::Completed;
                }
                drop(inner);
                self.fire(SchedulerEvent::Completed {
                    script_id,
                    result: Some(result),
                });
            }
            RunOutcome::Suspended(value, state) => {
                let mut inner = self.inner.lock().unwrap();
                let priority = if let Some(script) = inner.scripts.iter_mut().find(|s| s.id == script_id) {
                    script.continuation_state = Some(state);
                    script.last_yielded_value = value.clone();
                    script.state = ScriptState::Suspended;
                    script.yield_count += 1;
                    script.priority
                } else {
                    0
                };
                for _ in 0..priority {
                    inner.run_queue.push_back(script_id);
                }
                drop(inner);
                self.fire(SchedulerEvent::Yielded { script_id, value });
            }
        }

        true
    }

    /// Grabs the bits of a script's state a tick needs to actually run it.
    /// Returns an error only if the script was removed out from under a
    /// concurrent `tick()` — a bug in caller coordination, not something
    /// any of this crate's public error kinds describe, so `anyhow` is the
    /// right fit here rather than stretching `ContinuumError`.
    fn snapshot_script(
        &self,
        script_id: u32,
    ) -> anyhow::Result<(Entry, Option<ContinuationState>, Option<AnyValue>)> {
        let inner = self.inner.lock().unwrap();
        let script = inner
            .scripts
            .iter()
            .find(|s| s.id == script_id)
            .with_context(|| format!("script {script_id} was removed mid-tick"))?;
        Ok((
            script.entry.clone(),
            script.continuation_state.clone(),
            script.last_yielded_value.clone(),
        ))
    }

    fn set_state(&self, script_id: u32, state: ScriptState) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(script) = inner.scripts.iter_mut().find(|s| s.id == script_id) {
                script.state = state;
            }
        }
        self.fire(SchedulerEvent::StateChanged { script_id, state });
    }

    /// Fails a script explicitly (used when `entry` itself signals an
    /// unrecoverable error outside the suspension protocol — this crate
    /// doesn't catch panics, so callers that want `Failed` semantics for a
    /// fallible entry should have it return a sentinel and call this).
    pub fn fail(&self, script_id: u32, error: impl Into<String>) {
        let error = error.into();
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(script) = inner.scripts.iter_mut().find(|s| s.id == script_id) {
                script.error = Some(error.clone());
                script.continuation_state = None;
                script.state = ScriptState::Failed;
            }
        }
        self.fire(SchedulerEvent::Failed { script_id, error });
    }

    /// Ticks until every script is terminal or `stop()` was called.
    pub fn run(&self) {
        loop {
            if self.inner.lock().unwrap().stop_requested {
                break;
            }
            if !self.tick() {
                if self.all_terminal() {
                    break;
                }
                std::thread::yield_now();
            }
        }
    }

    /// Ticks at most `n` times (or until nothing is runnable).
    pub fn run_for(&self, n: usize) {
        for _ in 0..n {
            if self.inner.lock().unwrap().stop_requested {
                break;
            }
            if !self.tick() {
                break;
            }
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .iter()
            .all(|s| matches!(s.state, ScriptState::Completed | ScriptState::Failed))
    }

    pub fn script_state(&self, script_id: u32) -> Option<ScriptState> {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .iter()
            .find(|s| s.id == script_id)
            .map(|s| s.state)
    }

    pub fn script_result(&self, script_id: u32) -> Option<AnyValue> {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .iter()
            .find(|s| s.id == script_id)
            .and_then(|s| s.result.clone())
    }
}
