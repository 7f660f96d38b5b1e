//! Circuit registry
//!
//! Maps circuit ids to their entries. The map lock is held only for the
//! map operation itself; each entry carries its own mutex, so work on one
//! circuit never contends with work on another. Never acquire the map lock
//! while waiting on an entry lock held elsewhere: entry first, map second.

use crate::{CircuitId, circuit::CircuitEntry};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// An entry behind its per-circuit lock
pub type SharedEntry<S, T> = Arc<Mutex<CircuitEntry<S, T>>>;

/// Thread-safe circuit id → entry map
pub struct CircuitRegistry<S, T> {
    circuits: RwLock<HashMap<CircuitId, SharedEntry<S, T>>>,
}

impl<S, T> CircuitRegistry<S, T> {
    pub fn new() -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new circuit under a fresh id
    ///
    /// `make` builds the entry once the id is known to be unused.
    pub fn create<F>(&self, make: F) -> (CircuitId, SharedEntry<S, T>)
    where
        F: FnOnce(CircuitId) -> CircuitEntry<S, T>,
    {
        let mut circuits = self.circuits.write();

        let mut id = CircuitId::new();
        while circuits.contains_key(&id) {
            id = CircuitId::new();
        }

        let entry = Arc::new(Mutex::new(make(id)));
        circuits.insert(id, Arc::clone(&entry));

        (id, entry)
    }

    pub fn try_get(&self, id: CircuitId) -> Option<SharedEntry<S, T>> {
        self.circuits.read().get(&id).cloned()
    }

    /// Drop a circuit from the map. Removing an absent id is a no-op.
    pub fn remove(&self, id: CircuitId) -> Option<SharedEntry<S, T>> {
        self.circuits.write().remove(&id)
    }

    pub fn contains(&self, id: CircuitId) -> bool {
        self.circuits.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.circuits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.read().is_empty()
    }

    pub fn ids(&self) -> Vec<CircuitId> {
        self.circuits.read().keys().copied().collect()
    }

    /// Snapshot of every entry, for sweeps that lock circuits one at a time
    pub fn entries(&self) -> Vec<SharedEntry<S, T>> {
        self.circuits.read().values().cloned().collect()
    }
}

impl<S, T> Default for CircuitRegistry<S, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, T> std::fmt::Debug for CircuitRegistry<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("circuits", &self.len())
            .finish()
    }
}
