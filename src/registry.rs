//! # Kestrel: Shared Registries
//!
//! Operator tables, macro rules and dispatch sets are process-wide state
//! that independent compilations read and extend. Each lives behind a
//! [`Shared`] handle; the registries themselves are persistent maps of
//! `Arc` entries, so a reader's snapshot is O(1) and a writer only ever
//! swaps whole entries.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use im::HashMap;
use log::trace;
use parking_lot::RwLock;

use crate::dispatch::{Branch, DispatchSet, Insertion};
use crate::runtime::MethodBody;

/// Cloneable handle to one registry. Clones share the same state.
pub struct Shared<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&*self.inner.read()).finish()
    }
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Runs `f` under the read lock. Keep `f` short; writers wait on it.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.read())
    }

    /// Runs `f` under the write lock. One writer at a time.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.write())
    }
}

impl<T: Clone> Shared<T> {
    /// A copy that later writes will not affect.
    pub fn snapshot(&self) -> T {
        self.inner.read().clone()
    }
}

// ============================================================================
// DISPATCH SET REGISTRY
// ============================================================================

/// Dispatch sets keyed by name or shape. Used for methods and macro rules.
pub struct SetRegistry<K, B> {
    sets: HashMap<K, Arc<DispatchSet<B>>>,
}

impl<K: Clone + Hash + Eq, B> Clone for SetRegistry<K, B> {
    fn clone(&self) -> Self {
        Self {
            sets: self.sets.clone(),
        }
    }
}

impl<K: Clone + Hash + Eq, B> Default for SetRegistry<K, B> {
    fn default() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }
}

impl<K: Clone + Hash + Eq + fmt::Debug, B> fmt::Debug for SetRegistry<K, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.sets.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

impl<K, B> SetRegistry<K, B>
where
    K: Clone + Hash + Eq + fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Arc<DispatchSet<B>>> {
        self.sets.get(key).cloned()
    }

    /// Adds `branch` to the set under `key`, creating the set if needed.
    ///
    /// The set is rebuilt and swapped in whole; holders of the previous
    /// `Arc` keep seeing the old branches.
    pub fn insert(&mut self, key: K, branch: Branch<B>) -> Insertion {
        let (next, outcome) = match self.sets.get(&key) {
            Some(set) => set.with_branch(branch),
            None => {
                let mut set = DispatchSet::new(&key.to_string());
                let outcome = set.insert(branch);
                (set, outcome)
            }
        };
        trace!("registry `{}`: {:?}", key, outcome);
        self.sets.insert(key, Arc::new(next));
        outcome
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<DispatchSet<B>>> {
        self.sets.remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.sets.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.sets.keys()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Method dispatch sets by externally visible name.
pub type MethodRegistry = SetRegistry<String, MethodBody>;

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::patterns::Pattern;

    fn registry() -> Shared<SetRegistry<String, u8>> {
        Shared::default()
    }

    #[test]
    fn snapshots_do_not_see_later_writes() {
        let shared = registry();
        shared.update(|r| r.insert("f".into(), Branch::new(1).argument(Pattern::literal(0))));
        let before = shared.snapshot();
        shared.update(|r| r.insert("f".into(), Branch::new(2).argument(Pattern::wildcard())));

        assert_eq!(before.get(&"f".to_string()).map(|s| s.len()), Some(1));
        assert_eq!(shared.read(|r| r.get(&"f".to_string()).map(|s| s.len())), Some(2));
    }

    #[test]
    fn redefinition_replaces_entry() {
        let shared = registry();
        let first = shared.update(|r| r.insert("f".into(), Branch::new(1).argument(Pattern::literal(0))));
        let second = shared.update(|r| r.insert("f".into(), Branch::new(9).argument(Pattern::literal(0))));
        assert_eq!(first, Insertion::Inserted(0));
        assert_eq!(second, Insertion::Replaced(0));
        let set = shared.read(|r| r.get(&"f".to_string())).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.branches().next().map(|b| b.body), Some(9));
    }

    #[test]
    fn concurrent_readers_see_whole_sets() {
        let shared = registry();
        let writer = shared.clone();
        let handle = thread::spawn(move || {
            for i in 0..50i64 {
                writer.update(|r| r.insert("f".into(), Branch::new(1).argument(Pattern::literal(i))));
            }
        });
        for _ in 0..50 {
            if let Some(set) = shared.read(|r| r.get(&"f".to_string())) {
                assert_eq!(set.branches().count(), set.len());
            }
        }
        handle.join().unwrap();
        assert_eq!(shared.read(|r| r.get(&"f".to_string()).map(|s| s.len())), Some(50));
    }
}
