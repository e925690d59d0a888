use std::collections::HashMap;
use std::sync::RwLock;

use orb_types::ObjectId;

use crate::error::StoreResult;
use crate::state::StoredState;
use crate::traits::StateStore;

/// In-memory, HashMap-based state store.
///
/// Intended for tests and embedding. States are cloned on read and write.
pub struct InMemoryStateStore {
    states: RwLock<HashMap<ObjectId, StoredState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.states.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().expect("lock poisoned").is_empty()
    }

    /// Total envelope bytes held.
    pub fn total_bytes(&self) -> usize {
        self.states
            .read()
            .expect("lock poisoned")
            .values()
            .map(StoredState::size)
            .sum()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for InMemoryStateStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredState>> {
        let map = self.states.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    fn write(&self, id: &ObjectId, state: &StoredState) -> StoreResult<()> {
        let mut map = self.states.write().expect("lock poisoned");
        map.insert(*id, state.clone());
        Ok(())
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let mut map = self.states.write().expect("lock poisoned");
        Ok(map.remove(id).is_some())
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        let map = self.states.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }

    fn ids(&self) -> StoreResult<Vec<ObjectId>> {
        let map = self.states.read().expect("lock poisoned");
        let mut ids: Vec<ObjectId> = map.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateStore")
            .field("object_count", &self.len())
            .finish()
    }
}
