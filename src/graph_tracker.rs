//! Object-graph tracker (§4.K): identity-preserving registry the
//! serializer threads every array through, so a future allow-listed
//! reference-like value could opt into shared/cyclic encoding without a
//! wire-format change.
//!
//! Every slot in today's `AnyValue` allow-list (§3) is a by-value
//! primitive, so there is no host object graph to actually share — arrays
//! nest and repeat structurally but never alias. `try_register` on a
//! freshly built array is therefore always `is_new` today; the tracker
//! still exists as its own component because the wire format and the
//! validator are defined in terms of it.

use crate::error::ContinuumError;
use std::collections::HashMap;

pub const DEFAULT_MAX_ALLOWED_ID: i64 = 10_000;

/// Serialize-side tracker: assigns ids by reference identity (here, pointer
/// identity of the value passed to `try_register`).
pub struct EncodeTracker {
    next_id: i64,
    seen: HashMap<usize, i64>,
}

impl Default for EncodeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeTracker {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            seen: HashMap::new(),
        }
    }

    /// Registers `ptr` (the address of the value being encoded) and
    /// returns `(id, is_new)`. A repeat of the same address returns the id
    /// it was first assigned with `is_new = false`.
    pub fn try_register(&mut self, ptr: usize) -> (i64, bool) {
        if let Some(&id) = self.seen.get(&ptr) {
            return (id, false);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.seen.insert(ptr, id);
        (id, true)
    }
}

/// Deserialize-side tracker: binds ids to freshly reconstructed objects,
/// rejecting anything that smells like a corrupted or malicious graph.
pub struct DecodeTracker<T> {
    max_allowed_id: i64,
    bound: HashMap<i64, Option<T>>,
}

impl<T: Clone + PartialEq> DecodeTracker<T> {
    pub fn new(max_allowed_id: i64) -> Self {
        Self {
            max_allowed_id,
            bound: HashMap::new(),
        }
    }

    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_MAX_ALLOWED_ID)
    }

    pub fn max_allowed_id(&self) -> i64 {
        self.max_allowed_id
    }

    /// Binds `id` to `obj` (or to a null sentinel when `obj` is `None`).
    /// Rejects an out-of-range id or a re-bind to a different instance.
    pub fn register_deserialized(&mut self, id: i64, obj: Option<T>) -> Result<(), ContinuumError> {
        if id < 0 || id > self.max_allowed_id {
            return Err(ContinuumError::MalformedObjectGraph {
                id,
                max_allowed_id: self.max_allowed_id,
            });
        }
        if let Some(existing) = self.bound.get(&id) {
            if existing != &obj {
                return Err(ContinuumError::MalformedObjectGraph {
                    id,
                    max_allowed_id: self.max_allowed_id,
                });
            }
            return Ok(());
        }
        self.bound.insert(id, obj);
        Ok(())
    }

    /// `Some(None)` distinguishes "id is bound to a registered null" from
    /// `None` meaning "id never seen."
    pub fn lookup(&self, id: i64) -> Option<Option<T>> {
        self.bound.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pointer_registers_once() {
        let mut tracker = EncodeTracker::new();
        let value = vec![1, 2, 3];
        let ptr = value.as_ptr() as usize;
        let (id_a, new_a) = tracker.try_register(ptr);
        let (id_b, new_b) = tracker.try_register(ptr);
        assert!(new_a);
        assert!(!new_b);
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn distinct_pointers_get_distinct_ids() {
        let mut tracker = EncodeTracker::new();
        let (id_a, _) = tracker.try_register(0x1000);
        let (id_b, _) = tracker.try_register(0x2000);
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn decode_tracker_rejects_out_of_range_id() {
        let mut tracker: DecodeTracker<i64> = DecodeTracker::new(10);
        assert!(tracker.register_deserialized(-1, Some(1)).is_err());
        assert!(tracker.register_deserialized(11, Some(1)).is_err());
    }

    #[test]
    fn decode_tracker_rejects_conflicting_rebind() {
        let mut tracker: DecodeTracker<i64> = DecodeTracker::new(10);
        tracker.register_deserialized(0, Some(1)).unwrap();
        assert!(tracker.register_deserialized(0, Some(2)).is_err());
        assert!(tracker.register_deserialized(0, Some(1)).is_ok(), "idempotent rebind to the same value is fine");
    }

    #[test]
    fn decode_tracker_distinguishes_unseen_from_registered_null() {
        let mut tracker: DecodeTracker<i64> = DecodeTracker::new(10);
        tracker.register_deserialized(1, None).unwrap();
        assert_eq!(tracker.lookup(1), Some(None));
        assert_eq!(tracker.lookup(2), None);
    }
}
