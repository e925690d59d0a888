use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use orb_object::{ObjectCell, ObjectRef};
use orb_types::{BackendId, ObjectId};

/// Resolves a persistent reference to a local proxy instance.
pub trait ProxyResolver: Send + Sync {
    fn resolve(&self, id: ObjectId, class: &str, hint: Option<BackendId>) -> ObjectRef;
}

/// Identity → proxy map shared by every decode in one process.
///
/// Decoding the same persistent identity twice yields the same instance for
/// as long as something else keeps that instance alive. Entries are weak so
/// the cache never pins objects in memory.
#[derive(Debug, Default)]
pub struct ProxyCache {
    proxies: Mutex<HashMap<ObjectId, Weak<ObjectCell>>>,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an existing persistent instance the canonical one for its
    /// identity. Returns `false` for volatile objects.
    pub fn register(&self, obj: &ObjectRef) -> bool {
        let Some(id) = obj.identity() else {
            return false;
        };
        self.proxies
            .lock()
            .expect("lock poisoned")
            .insert(id, Arc::downgrade(obj));
        true
    }

    pub fn get(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.proxies
            .lock()
            .expect("lock poisoned")
            .get(id)
            .and_then(Weak::upgrade)
    }

    pub fn forget(&self, id: &ObjectId) {
        self.proxies.lock().expect("lock poisoned").remove(id);
    }

    /// Drop entries whose instance is gone. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut map = self.proxies.lock().expect("lock poisoned");
        let before = map.len();
        map.retain(|_, weak| weak.strong_count() > 0);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.proxies.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProxyResolver for ProxyCache {
    fn resolve(&self, id: ObjectId, class: &str, hint: Option<BackendId>) -> ObjectRef {
        let mut map = self.proxies.lock().expect("lock poisoned");
        if let Some(existing) = map.get(&id).and_then(Weak::upgrade) {
            if existing.hint().is_none() && hint.is_some() {
                existing.set_hint(hint);
            }
            return existing;
        }
        let proxy = ObjectCell::proxy(id, class, hint);
        map.insert(id, Arc::downgrade(&proxy));
        proxy
    }
}
