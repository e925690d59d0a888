use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use orb_codec::{Envelope, GraphDecoder, GraphEncoder, ProxyCache, ProxyResolver};
use orb_directory::Directory;
use orb_heap::{HeapManager, SweeperHandle};
use orb_lock::{LockManager, ObjectLockGuard};
use orb_object::{ClassRegistry, ObjectCell, ObjectRef, Value};
use orb_protocol::{BackendApi, BackendPool};
use orb_store::StateStore;
use orb_types::{
    BackendId, BackendInfo, LockMode, ObjectId, ObjectMetadata, OrbError, OrbResult, Stage,
};
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::sink::StoreSink;

/// What this backend holds for an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// Cached ownership of one object, learnt from the directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ownership {
    pub role: Role,
    pub class_name: String,
    pub read_only: bool,
    /// Master of record when the role was learnt.
    pub master: BackendId,
}

impl Ownership {
    /// Ownership of `backend` according to `metadata`, or `None` if it
    /// holds no copy.
    pub fn from_metadata(metadata: &ObjectMetadata, backend: &BackendId) -> Option<Self> {
        let role = if metadata.is_master(backend) {
            Role::Master
        } else if metadata.is_replica(backend) {
            Role::Replica
        } else {
            return None;
        };
        Some(Self {
            role,
            class_name: metadata.class_name.clone(),
            read_only: metadata.is_read_only,
            master: metadata.master_backend_id,
        })
    }
}

/// A backend process: holds authoritative state for the objects it
/// masters and read copies for those it replicates.
pub struct BackendRuntime {
    pub(crate) id: BackendId,
    pub(crate) config: BackendConfig,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) registry: Arc<ClassRegistry>,
    pub(crate) peers: Arc<BackendPool>,
    pub(crate) locks: LockManager,
    pub(crate) heap: Arc<HeapManager>,
    pub(crate) proxies: ProxyCache,
    roles: RwLock<HashMap<ObjectId, Ownership>>,
    /// Bumped whenever a role is set or forgotten. A directory answer read
    /// across a bump may predate a relocation and is not cached.
    role_epoch: AtomicU64,
    sweeper: Mutex<Option<SweeperHandle>>,
    shutting_down: AtomicBool,
}

impl BackendRuntime {
    pub fn new(
        config: BackendConfig,
        directory: Arc<dyn Directory>,
        store: Arc<dyn StateStore>,
        registry: Arc<ClassRegistry>,
        peers: Arc<BackendPool>,
    ) -> Arc<Self> {
        let id = config.id.unwrap_or_default();
        let locks = LockManager::new();
        let sink = Arc::new(StoreSink::new(Arc::clone(&store), Arc::clone(&registry)));
        let heap = Arc::new(HeapManager::new(config.heap.clone(), locks.clone(), sink));
        Arc::new(Self {
            id,
            config,
            directory,
            store,
            registry,
            peers,
            locks,
            heap,
            proxies: ProxyCache::new(),
            roles: RwLock::new(HashMap::new()),
            role_epoch: AtomicU64::new(0),
            sweeper: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn heap(&self) -> &Arc<HeapManager> {
        &self.heap
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Advertise this backend in the directory, make it reachable through
    /// the peer pool and start the eviction sweep.
    pub async fn start(self: &Arc<Self>) -> OrbResult<()> {
        self.check_running()?;
        let info = BackendInfo::new(self.id, &self.config.name, &self.config.address);
        self.directory.register_backend(info).await?;
        self.peers.insert(Arc::clone(self) as Arc<dyn BackendApi>);
        if self.config.run_sweeper {
            let mut sweeper = self.sweeper.lock().expect("lock poisoned");
            if sweeper.is_none() {
                *sweeper = Some(self.heap.spawn_sweeper());
            }
        }
        info!(backend = %self.id, name = %self.config.name, "backend started");
        Ok(())
    }

    /// Stop accepting operations, stop the sweep and flush every dirty
    /// object. Returns the number of objects flushed.
    pub async fn shutdown(&self) -> OrbResult<usize> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let sweeper = self.sweeper.lock().expect("lock poisoned").take();
        if let Some(handle) = sweeper {
            handle.shutdown().await;
        }
        let flushed = self.heap.flush_all().await?;
        self.peers.remove(&self.id);
        if let Err(e) = self.directory.unregister_backend(&self.id).await {
            warn!(backend = %self.id, error = %e, "could not withdraw backend");
        }
        info!(backend = %self.id, flushed, "backend stopped");
        Ok(flushed)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) fn check_running(&self) -> OrbResult<()> {
        if self.is_shutting_down() {
            return Err(OrbError::Shutdown);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Ownership
    // ---------------------------------------------------------------

    /// Ownership of `id`, from the cache or else the directory.
    ///
    /// Fails with `NotMaster` (carrying the master of record) when this
    /// backend holds no copy.
    pub async fn ownership(&self, id: ObjectId) -> OrbResult<Ownership> {
        let cached = self.roles.read().expect("lock poisoned").get(&id).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        self.lookup_ownership(id).await
    }

    /// Ownership of `id` read from the directory, bypassing the cache.
    pub(crate) async fn lookup_ownership(&self, id: ObjectId) -> OrbResult<Ownership> {
        let epoch = self.role_epoch.load(Ordering::SeqCst);
        let metadata = self.directory.get(&id).await?;
        let ownership = Ownership::from_metadata(&metadata, &self.id).ok_or(OrbError::NotMaster {
            id,
            master: Some(metadata.master_backend_id),
        })?;
        let mut roles = self.roles.write().expect("lock poisoned");
        if self.role_epoch.load(Ordering::SeqCst) == epoch {
            debug!(backend = %self.id, %id, role = ?ownership.role, "learnt role");
            roles.insert(id, ownership.clone());
        } else {
            debug!(backend = %self.id, %id, "roles changed during lookup, not caching");
        }
        Ok(ownership)
    }

    pub fn cached_role(&self, id: &ObjectId) -> Option<Role> {
        self.roles
            .read()
            .expect("lock poisoned")
            .get(id)
            .map(|o| o.role)
    }

    pub(crate) fn set_ownership(&self, id: ObjectId, ownership: Ownership) {
        let mut roles = self.roles.write().expect("lock poisoned");
        self.role_epoch.fetch_add(1, Ordering::SeqCst);
        roles.insert(id, ownership);
    }

    pub(crate) fn forget_ownership(&self, id: &ObjectId) {
        let mut roles = self.roles.write().expect("lock poisoned");
        self.role_epoch.fetch_add(1, Ordering::SeqCst);
        roles.remove(id);
    }

    /// Reject `mode` on `id` where this backend may not serve it.
    pub(crate) fn check_access(
        &self,
        id: ObjectId,
        ownership: &Ownership,
        mode: LockMode,
    ) -> OrbResult<()> {
        if !mode.is_write() {
            return Ok(());
        }
        if ownership.role != Role::Master {
            return Err(OrbError::NotMaster {
                id,
                master: Some(ownership.master),
            });
        }
        if ownership.read_only {
            return Err(OrbError::ReadOnly { id });
        }
        Ok(())
    }

    /// Lock `id` for `mode` and confirm ownership once the lock is held.
    ///
    /// If any role changed while this operation waited, the re-check goes
    /// to the directory, so a move that committed meanwhile is answered
    /// with `NotMaster` naming the new master.
    pub(crate) async fn lock_owned(
        &self,
        id: ObjectId,
        mode: LockMode,
    ) -> OrbResult<(ObjectLockGuard, Ownership)> {
        let epoch = self.role_epoch.load(Ordering::SeqCst);
        let ownership = self.ownership(id).await?;
        self.check_access(id, &ownership, mode)?;
        let guard = self
            .locks
            .acquire(id, mode, Some(self.config.lock_timeout()))
            .await?;
        let ownership = if self.role_epoch.load(Ordering::SeqCst) == epoch {
            self.ownership(id).await?
        } else {
            self.lookup_ownership(id).await?
        };
        self.check_access(id, &ownership, mode)?;
        Ok((guard, ownership))
    }

    // ---------------------------------------------------------------
    // State
    // ---------------------------------------------------------------

    /// Resident instance of `id`, materialized from the state store on a
    /// miss. The caller holds the object lock.
    ///
    /// A store miss for an object the directory places elsewhere is
    /// answered with `NotMaster`, not `DoesNotExist`.
    pub(crate) async fn ensure_loaded(
        &self,
        id: ObjectId,
        class_name: &str,
    ) -> OrbResult<ObjectRef> {
        if let Some(instance) = self.heap.get(&id) {
            return Ok(instance);
        }
        let Some(stored) = self.store.read(&id).map_err(|e| e.at(Stage::Load))? else {
            return Err(self.missing_state(id).await);
        };
        if stored.class_name != class_name {
            return Err(OrbError::Deserialization {
                what: format!("stored state of {id}"),
                reason: format!("class {} but directory says {class_name}", stored.class_name),
            });
        }
        let envelope = Envelope::from_bytes(&stored.envelope)?;
        let instance = self.proxies.resolve(id, class_name, Some(self.id));
        GraphDecoder::new(&self.registry, &self.proxies, &envelope).decode_state_into(&instance)?;
        let resident = self.heap.insert_loaded_if_absent(id, instance);
        debug!(backend = %self.id, %id, "loaded object from store");
        Ok(resident)
    }

    async fn missing_state(&self, id: ObjectId) -> OrbError {
        self.forget_ownership(&id);
        match self.directory.try_get(&id).await {
            Ok(Some(metadata)) if !metadata.is_master(&self.id) => {
                debug!(
                    backend = %self.id,
                    %id,
                    master = %metadata.master_backend_id,
                    "state lives elsewhere"
                );
                OrbError::NotMaster {
                    id,
                    master: Some(metadata.master_backend_id),
                }
            }
            Ok(_) => OrbError::does_not_exist(format!("stored state of {id}")),
            Err(e) => e,
        }
    }

    pub(crate) fn encode_state(&self, instance: &ObjectRef) -> OrbResult<Vec<u8>> {
        Ok(GraphEncoder::new(&self.registry)
            .encode_state(instance)?
            .to_bytes())
    }

    pub(crate) fn encode_value(&self, value: &Value) -> OrbResult<Vec<u8>> {
        Ok(GraphEncoder::new(&self.registry)
            .encode_value(value)?
            .to_bytes())
    }

    pub(crate) fn decode_value(&self, bytes: &[u8]) -> OrbResult<Value> {
        let envelope = Envelope::from_bytes(bytes)?;
        Ok(GraphDecoder::new(&self.registry, &self.proxies, &envelope).decode_value()?)
    }

    /// Decode `bytes` as the state of a `class_name` object without
    /// keeping the result. Returns the class named by the envelope.
    pub(crate) fn validate_state(&self, id: ObjectId, bytes: &[u8]) -> OrbResult<String> {
        let envelope = Envelope::from_bytes(bytes)?;
        let class_name = envelope
            .root_class()
            .ok_or_else(|| OrbError::Deserialization {
                what: format!("state of {id}"),
                reason: "root is not an object".into(),
            })?
            .to_string();
        let scratch = ObjectCell::proxy(id, &class_name, None);
        GraphDecoder::new(&self.registry, &self.proxies, &envelope).decode_state_into(&scratch)?;
        Ok(class_name)
    }

    /// Forget every local trace of `id`: role, heap entry and stored state.
    /// The caller holds the write lock.
    pub(crate) fn drop_local_copy(&self, id: &ObjectId, new_hint: Option<BackendId>) {
        self.forget_ownership(id);
        if let Some(instance) = self.heap.remove(id) {
            instance.set_loaded(false);
            instance.clear_fields();
            instance.set_hint(new_hint);
        }
        if let Err(e) = self.store.delete(id) {
            warn!(backend = %self.id, %id, error = %e, "could not delete local state");
        }
    }
}

impl fmt::Debug for BackendRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRuntime")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("resident", &self.heap.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use orb_directory::InMemoryDirectory;
    use orb_store::FileStateStore;

    use super::*;
    use crate::testing::{decode, encode_args, registry, request};

    #[test]
    fn ownership_follows_metadata() {
        let master = BackendId::new();
        let replica = BackendId::new();
        let mut metadata = ObjectMetadata::new(ObjectId::new(), "Counter", "default", master)
            .read_only(true);
        metadata.add_replica(replica);

        let owned = Ownership::from_metadata(&metadata, &master).unwrap();
        assert_eq!(owned.role, Role::Master);
        assert!(owned.read_only);
        let copy = Ownership::from_metadata(&metadata, &replica).unwrap();
        assert_eq!(copy.role, Role::Replica);
        assert_eq!(copy.master, master);
        assert!(Ownership::from_metadata(&metadata, &BackendId::new()).is_none());
    }

    #[test]
    fn writes_need_mastership() {
        let master = BackendId::new();
        let id = ObjectId::new();
        let backend = BackendRuntime::new(
            BackendConfig::default(),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(orb_store::InMemoryStateStore::new()),
            registry(),
            Arc::new(BackendPool::new()),
        );
        let replica = Ownership {
            role: Role::Replica,
            class_name: "Counter".into(),
            read_only: false,
            master,
        };
        assert!(backend.check_access(id, &replica, LockMode::Read).is_ok());
        assert_eq!(
            backend.check_access(id, &replica, LockMode::Write),
            Err(OrbError::NotMaster {
                id,
                master: Some(master)
            })
        );
    }

    #[tokio::test]
    async fn restart_recovers_state_from_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());
        let registry = registry();
        let config = BackendConfig {
            id: Some(BackendId::new()),
            run_sweeper: false,
            ..BackendConfig::named("durable")
        };

        let boot = || {
            BackendRuntime::new(
                config.clone(),
                directory.clone(),
                Arc::new(FileStateStore::open(dir.path()).unwrap()),
                registry.clone(),
                Arc::new(BackendPool::new()),
            )
        };

        let first = boot();
        first.start().await.unwrap();
        let id = first
            .make_persistent(request(&registry, 10, Some("durable")))
            .await
            .unwrap();
        first
            .execute(id, "incr", encode_args(&registry, vec![Value::Int(5)]))
            .await
            .unwrap();
        assert_eq!(first.shutdown().await.unwrap(), 1);

        let second = boot();
        second.start().await.unwrap();
        assert!(second.heap().is_empty());
        let bytes = second
            .execute(id, "get", encode_args(&registry, vec![]))
            .await
            .unwrap();
        assert_eq!(decode(&registry, &bytes), Value::Int(15));
        assert_eq!(second.cached_role(&id), Some(Role::Master));
    }
}
