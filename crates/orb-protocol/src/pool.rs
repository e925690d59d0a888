use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use orb_types::{BackendId, OrbError, OrbResult, Stage};

use crate::api::BackendApi;

/// Reachable backends by identity.
#[derive(Default)]
pub struct BackendPool {
    backends: RwLock<HashMap<BackendId, Arc<dyn BackendApi>>>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the endpoint for `backend.backend_id()`.
    pub fn insert(&self, backend: Arc<dyn BackendApi>) {
        self.backends
            .write()
            .expect("lock poisoned")
            .insert(backend.backend_id(), backend);
    }

    pub fn remove(&self, id: &BackendId) -> Option<Arc<dyn BackendApi>> {
        self.backends.write().expect("lock poisoned").remove(id)
    }

    /// Endpoint for `id`, or `Unavailable` if it is not reachable from here.
    pub fn get(&self, id: &BackendId) -> OrbResult<Arc<dyn BackendApi>> {
        self.backends
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| {
                OrbError::unavailable(format!("backend {}", id.short_id()), Stage::Rpc, "not connected")
            })
    }

    pub fn contains(&self, id: &BackendId) -> bool {
        self.backends.read().expect("lock poisoned").contains_key(id)
    }

    /// Sorted identities of all reachable backends.
    pub fn ids(&self) -> Vec<BackendId> {
        let mut ids: Vec<_> = self
            .backends
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.backends.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPool").field("ids", &self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::framed::{FrameChannel, FramedBackend};
    use crate::error::ProtocolResult;
    use async_trait::async_trait;

    struct Nowhere;

    #[async_trait]
    impl FrameChannel for Nowhere {
        async fn round_trip(&self, _frame: Vec<u8>) -> ProtocolResult<Vec<u8>> {
            Err(std::io::Error::from(std::io::ErrorKind::NotConnected).into())
        }
    }

    fn endpoint(id: BackendId) -> Arc<dyn BackendApi> {
        Arc::new(FramedBackend::new(id, Arc::new(Nowhere), Duration::from_millis(10)))
    }

    #[test]
    fn insert_get_remove() {
        let pool = BackendPool::new();
        let a = BackendId::new();
        let b = BackendId::new();
        pool.insert(endpoint(a));
        pool.insert(endpoint(b));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(&a).unwrap().backend_id(), a);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(pool.ids(), expected);

        assert!(pool.remove(&a).is_some());
        assert!(!pool.contains(&a));
        let err = pool.get(&a).err().unwrap();
        assert!(err.is_retryable());
    }
}
