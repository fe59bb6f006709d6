//! Entry-point registry (§4.G): maps a method token back to the callable
//! that can resume it, so `resume(continuation)` doesn't require the caller
//! to already have the entry point in hand.

use crate::value::AnyValue;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

/// An entry point: a closure restart-able from a frame chain, boxed behind
/// `Any` so callables returning different result types can share one map.
/// `lookup<T>` recovers the concrete type and fails loudly if it was
/// registered under a different one.
type BoxedEntry = Arc<dyn Any + Send + Sync>;

/// A continuable entry point returning `T`, as stored in the registry.
pub type Entry<T> = Arc<dyn Fn(Option<AnyValue>) -> T + Send + Sync>;

/// Concurrent `method_token -> entry` map. Safe for lookup and registration
/// from any worker at any time (built on `dashmap`, as the rest of this
/// crate's shared registries are).
#[derive(Default)]
pub struct EntryPointRegistry {
    entries: DashMap<i32, BoxedEntry>,
}

impl EntryPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: 'static + Send + Sync>(&self, token: i32, entry: Entry<T>) {
        let replaced = self.entries.insert(token, Arc::new(entry)).is_some();
        debug!(token, replaced, "entry point registered");
    }

    pub fn unregister(&self, token: i32) {
        let existed = self.entries.remove(&token).is_some();
        debug!(token, existed, "entry point unregistered");
    }

    /// Looks `token` up and downcasts to `Entry<T>`. Returns `None` both
    /// when the token is unregistered and when it's registered under a
    /// different return type — the caller can't tell those apart from this
    /// call alone, which is why `contains` exists separately.
    pub fn lookup<T: 'static + Send + Sync>(&self, token: i32) -> Option<Entry<T>> {
        let Some(boxed) = self.entries.get(&token) else {
            warn!(token, "lookup for unregistered entry point token");
            return None;
        };
        let entry = boxed.downcast_ref::<Entry<T>>().cloned();
        if entry.is_none() {
            warn!(token, "entry point registered under a different return type");
        }
        entry
    }

    pub fn contains(&self, token: i32) -> bool {
        self.entries.contains_key(&token)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_round_trips() {
        let registry = EntryPointRegistry::new();
        let entry: Entry<i64> = Arc::new(|_resume| 42);
        registry.register(7, entry);

        assert!(registry.contains(7));
        let looked_up = registry.lookup::<i64>(7).unwrap();
        assert_eq!(looked_up(None), 42);
    }

    #[test]
    fn lookup_with_wrong_type_is_none() {
        let registry = EntryPointRegistry::new();
        let entry: Entry<i64> = Arc::new(|_| 1);
        registry.register(1, entry);
        assert!(registry.lookup::<String>(1).is_none());
        assert!(registry.contains(1), "still registered, just under a different T");
    }

    #[test]
    fn unregister_and_clear() {
        let registry = EntryPointRegistry::new();
        registry.register::<i64>(1, Arc::new(|_| 1));
        registry.register::<i64>(2, Arc::new(|_| 2));
        registry.unregister(1);
        assert_eq!(registry.count(), 1);
        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
