//! Typed error surface for every public boundary (§7).
//!
//! Internal plumbing inside a single VM-style tick is free to use
//! `anyhow::Result` the way the teacher's engine/VM do for "this would be a
//! bug in our own code, not attacker input" paths; anything that crosses a
//! public API (`Runner`, `Validator`, `Scheduler`, the serializer) returns
//! `Result<_, ContinuumError>` so callers can match on a closed set of
//! kinds instead of parsing error strings.

use thiserror::Error;

/// One error kind from §7's table, or a bundle of them from `validate()`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContinuumError {
    #[error("continuation state version {found} is unsupported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("method token {0} is not registered with the validator")]
    UnregisteredMethod(i32),

    #[error("yield point {yield_point_id} is not valid for method token {token} (frame {frame_index})")]
    YieldPointOutOfRange {
        token: i32,
        yield_point_id: i32,
        frame_index: usize,
    },

    #[error("frame {frame_index} (token {token}) has {actual} slots, expected at least {required} live slots at yield point {yield_point_id}")]
    SlotCountMismatch {
        token: i32,
        frame_index: usize,
        yield_point_id: i32,
        actual: usize,
        required: usize,
    },

    #[error("frame {frame_index} slot {slot_index} has type {actual:?}, incompatible with declared type {declared:?}")]
    SlotTypeMismatch {
        frame_index: usize,
        slot_index: usize,
        actual: String,
        declared: String,
    },

    #[error("value of type `{type_name}` is not allow-listed ({context})")]
    DisallowedType { type_name: String, context: String },

    #[error("frame chain is malformed (cycle detected after {links_traversed} links)")]
    MalformedChain { links_traversed: usize },

    #[error("stack depth {depth} exceeds maximum {max}")]
    StackTooDeep { depth: usize, max: usize },

    #[error("no entry point registered for method token {0}")]
    UnregisteredEntry(i32),

    #[error("slot index {index} out of range (frame has {len} slots)")]
    SlotIndexOutOfRange { index: u16, len: usize },

    #[error("object graph id {id} conflicts with a previously registered object (max allowed id {max_allowed_id})")]
    MalformedObjectGraph { id: i64, max_allowed_id: i64 },

    #[error("{} validation error(s): {}", .0.len(), format_validation_list(.0))]
    Validation(Vec<ContinuumError>),

    #[error("decode exceeded bound: {0}")]
    DecodeBoundExceeded(String),

    #[error("serialization failed: {0}")]
    Codec(String),
}

fn format_validation_list(errors: &[ContinuumError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, ContinuumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_bundle_formats_each_inner_error() {
        let err = ContinuumError::Validation(vec![
            ContinuumError::UnregisteredMethod(7),
            ContinuumError::StackTooDeep { depth: 5, max: 3 },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("method token 7"));
        assert!(msg.contains("stack depth 5"));
    }
}
