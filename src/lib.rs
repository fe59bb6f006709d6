//! Serializable, migratable continuations for a cooperatively scheduled
//! script runtime.
//!
//! A computation marked continuable can be suspended at a yield point, its
//! logical call stack captured into a [`frame::ContinuationState`],
//! serialized, and resumed later — possibly in a different process. This
//! crate is the runtime side of that contract: the suspension/resume
//! protocol, the frame-record data model, the per-worker execution
//! context, a cooperative scheduler, the security validator that gates
//! untrusted states before they're resumed, and the binary codec for the
//! wire form.
//!
//! What this crate does not include: the source-to-state-machine
//! transformer (it consumes hand-written stand-ins for transformed code in
//! its own tests), a dedicated JSON codec (every type here already derives
//! `serde::Serialize`/`Deserialize`, so `serde_json` round-trips them for
//! free), and any network-facing server.

pub mod capture;
pub mod context;
pub mod error;
pub mod frame;
pub mod graph_tracker;
pub mod hash;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod serializer;
pub mod signal;
pub mod validator;
pub mod value;

pub use context::ExecutionContext;
pub use error::{ContinuumError, Result};
pub use frame::{ContinuationState, FrameDescriptor, FrameRecord, FrameSlot, SlotKind};
pub use registry::EntryPointRegistry;
pub use runner::{RunOutcome, Runner};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEvent, ScriptState};
pub use serializer::{BinarySerializer, SerializerLimits};
pub use signal::{StepOutcome, Suspending};
pub use validator::{Validator, ValidatorOptions};
pub use value::{AnyValue, TypeRef};

/// Installs a `tracing_subscriber` filtered by `RUST_LOG` (or `info` by
/// default). Test/demo convenience, not required to use the crate — hence
/// gated behind `cfg(test)`, where `tracing-subscriber` is available as a
/// dev-dependency.
#[cfg(test)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
