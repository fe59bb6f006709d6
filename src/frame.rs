//! Frame model (§3, §4.B): the data captured at one suspension point, and
//! the bookkeeping that links frames into a chain and a chain into a
//! resumable [`ContinuationState`].

use crate::error::ContinuumError;
use crate::value::{AnyValue, TypeRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Captured state of one logical call, innermost frame first.
///
/// Immutable once built by [`crate::capture::capture_frame`] — nothing in
/// this crate ever mutates a `FrameRecord` after construction, which is
/// what lets `caller` chains share tails safely via `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub method_token: i32,
    pub yield_point_id: i32,
    pub slots: Vec<AnyValue>,
    pub caller: Option<Arc<FrameRecord>>,
}

impl FrameRecord {
    pub fn new(
        method_token: i32,
        yield_point_id: i32,
        slots: Vec<AnyValue>,
        caller: Option<Arc<FrameRecord>>,
    ) -> Self {
        Self {
            method_token,
            yield_point_id,
            slots,
            caller,
        }
    }
}

/// Current wire/data-model version. Bump when the `ContinuationState`
/// contract changes incompatibly.
pub const CURRENT_VERSION: u32 = 1;

/// A fully captured, resumable snapshot of a suspended computation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContinuationState {
    pub version: u32,
    pub stack_head: Option<Arc<FrameRecord>>,
    pub yielded_value: Option<AnyValue>,
}

impl ContinuationState {
    pub fn new(stack_head: Option<Arc<FrameRecord>>, yielded_value: Option<AnyValue>) -> Self {
        Self {
            version: CURRENT_VERSION,
            stack_head,
            yielded_value,
        }
    }

    /// The outermost frame's method token, used by `Runner::resume` (no
    /// entry) to look the continuation's entry point up in the registry.
    pub fn outermost_method_token(&self) -> Option<i32> {
        let mut current = self.stack_head.as_ref()?;
        loop {
            match &current.caller {
                Some(next) => current = next,
                None => return Some(current.method_token),
            }
        }
    }
}

/// Where a slot lives in the original frame's activation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    Local,
    Argument,
    EvalStack,
}

/// Compile-time description of one slot in a method's activation record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameSlot {
    pub index: u16,
    pub name: Option<String>,
    pub kind: SlotKind,
    pub declared_type: TypeRef,
    pub requires_serialization: bool,
}

/// Compile-time metadata for one continuable method, consulted by the
/// [`crate::validator::Validator`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub method_token: i32,
    pub method_name: String,
    pub slots: Vec<FrameSlot>,
    /// Sorted; acts as the domain of valid yield-point ids for this method.
    pub yield_point_ids: Vec<i32>,
    /// yield_point_id -> bitset (by slot index) of slots live at that point.
    pub live_slots_at_yield_point: BTreeMap<i32, Vec<bool>>,
}

impl FrameDescriptor {
    /// Validates the descriptor's own §3 invariants. A descriptor that
    /// fails this should never be registered — it would make every frame
    /// referencing it unvalidatable.
    pub fn check_invariants(&self) -> Result<(), ContinuumError> {
        if self.yield_point_ids.len() != self.live_slots_at_yield_point.len() {
            return Err(ContinuumError::Codec(format!(
                "descriptor for token {} has {} yield points but {} live-slot entries",
                self.method_token,
                self.yield_point_ids.len(),
                self.live_slots_at_yield_point.len()
            )));
        }
        for (yp, live) in &self.live_slots_at_yield_point {
            for (idx, is_live) in live.iter().enumerate() {
                if *is_live && idx >= self.slots.len() {
                    return Err(ContinuumError::Codec(format!(
                        "descriptor for token {}, yield point {yp}: live slot index {idx} >= slot count {}",
                        self.method_token,
                        self.slots.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of slots marked live at `yield_point_id`, or 0 if unknown.
    pub fn count_live_slots(&self, yield_point_id: i32) -> usize {
        self.live_slots_at_yield_point
            .get(&yield_point_id)
            .map(|bits| bits.iter().filter(|b| **b).count())
            .unwrap_or(0)
    }
}

/// Counts the links in a `next`-chained sequence, terminating even if the
/// chain cycles back on itself (Floyd's tortoise-and-hare).
///
/// Returns `Ok(len)` for an acyclic chain of `len` links, or
/// `Err(links_traversed)` the moment a cycle is detected. This is the one
/// generic primitive both [`get_stack_depth`] (on live `Arc` chains, which
/// are acyclic by construction) and the binary deserializer (on untrusted
/// index-based chains, which are not) build on.
pub(crate) fn floyd_chain_length<T: Clone>(
    start: Option<T>,
    next: impl Fn(&T) -> Option<T>,
    same_node: impl Fn(&T, &T) -> bool,
) -> Result<usize, usize> {
    // Phase 1: Floyd cycle detection (slow advances 1 link, fast 2).
    let mut slow = start.clone();
    let mut fast = start.clone();
    let mut steps = 0usize;
    loop {
        fast = match fast {
            Some(f) => next(&f),
            None => break,
        };
        steps += 1;
        fast = match fast {
            Some(f) => next(&f),
            None => break,
        };
        steps += 1;
        slow = slow.and_then(|s| next(&s));
        if let (Some(s), Some(f)) = (&slow, &fast) {
            if same_node(s, f) {
                return Err(steps);
            }
        }
    }

    // Phase 2: no cycle — the chain is finite, count it exactly.
    let mut len = 0usize;
    let mut cur = start;
    while let Some(c) = cur {
        len += 1;
        cur = next(&c);
    }
    Ok(len)
}

/// Stack depth of a live frame chain. Always terminates: legitimate chains
/// built by [`crate::capture::capture_frame`] are acyclic by construction,
/// but this still runs the cycle-safe walk as a defensive backstop against
/// a corrupted chain slipping past the validator.
pub fn get_stack_depth(head: &Option<Arc<FrameRecord>>) -> Result<usize, ContinuumError> {
    floyd_chain_length(
        head.clone(),
        |f: &Arc<FrameRecord>| f.caller.clone(),
        |a, b| Arc::ptr_eq(a, b),
    )
    .map_err(|links_traversed| ContinuumError::MalformedChain { links_traversed })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(n: usize) -> Option<Arc<FrameRecord>> {
        let mut head = None;
        for i in 0..n {
            head = Some(Arc::new(FrameRecord::new(i as i32, 0, vec![], head)));
        }
        head
    }

    #[test]
    fn depth_of_empty_chain_is_zero() {
        assert_eq!(get_stack_depth(&None).unwrap(), 0);
    }

    #[test]
    fn depth_matches_acyclic_chain_length() {
        for n in [1usize, 2, 10, 137] {
            assert_eq!(get_stack_depth(&chain_of(n)).unwrap(), n, "n={n}");
        }
    }

    #[test]
    fn outermost_method_token_walks_to_the_end() {
        let head = chain_of(5); // tokens 4,3,2,1,0 innermost->outermost
        let state = ContinuationState::new(head, None);
        assert_eq!(state.outermost_method_token(), Some(0));
    }

    #[test]
    fn outermost_method_token_is_none_for_empty_state() {
        let state = ContinuationState::new(None, None);
        assert_eq!(state.outermost_method_token(), None);
    }

    #[test]
    fn floyd_chain_length_terminates_on_cycle() {
        // Simulate a 3-node cycle 0 -> 1 -> 2 -> 0 using plain indices —
        // exercises the generic cycle-safe walker without needing to forge
        // an actual (impossible, by construction) FrameRecord cycle.
        let next = |n: &i32| Some((n + 1) % 3);
        let result = floyd_chain_length(Some(0i32), next, |a, b| a == b);
        assert!(result.is_err());
        let links_traversed = result.unwrap_err();
        assert!(links_traversed <= 6, "should stop quickly: {links_traversed}");
    }

    #[test]
    fn floyd_chain_length_matches_naive_count_when_acyclic() {
        // A chain of indices 0 -> 1 -> 2 -> 3 -> None (length 4).
        let next = |n: &usize| if *n < 3 { Some(n + 1) } else { None };
        let result = floyd_chain_length(Some(0usize), next, |a, b| a == b);
        assert_eq!(result, Ok(4));
    }

    #[test]
    fn descriptor_invariant_catches_mismatched_yield_point_counts() {
        let d = FrameDescriptor {
            method_token: 1,
            method_name: "m".into(),
            slots: vec![],
            yield_point_ids: vec![0, 1],
            live_slots_at_yield_point: BTreeMap::from([(0, vec![])]),
        };
        assert!(d.check_invariants().is_err());
    }

    #[test]
    fn descriptor_invariant_catches_out_of_range_live_slot() {
        let d = FrameDescriptor {
            method_token: 1,
            method_name: "m".into(),
            slots: vec![],
            yield_point_ids: vec![0],
            live_slots_at_yield_point: BTreeMap::from([(0, vec![true])]),
        };
        assert!(d.check_invariants().is_err());
    }

    #[test]
    fn count_live_slots_counts_true_bits() {
        let d = FrameDescriptor {
            method_token: 1,
            method_name: "m".into(),
            slots: vec![],
            yield_point_ids: vec![0],
            live_slots_at_yield_point: BTreeMap::from([(0, vec![true, false, true])]),
        };
        assert_eq!(d.count_live_slots(0), 2);
        assert_eq!(d.count_live_slots(99), 0);
    }
}
