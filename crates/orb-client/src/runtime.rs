use std::sync::{Arc, Mutex};

use orb_codec::{Envelope, GraphDecoder, GraphEncoder, ProxyCache, ProxyResolver};
use orb_directory::{names, Directory};
use orb_heap::{HeapManager, SweeperHandle};
use orb_lock::LockManager;
use orb_object::{ClassRegistry, ObjectRef, Value};
use orb_protocol::{BackendApi, BackendPool, MakePersistentRequest};
use orb_types::{BackendId, ObjectId, OrbError, OrbResult, Stage};
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::handle::ObjectHandle;
use crate::router::{Router, RpcFuture};
use crate::sink::RemoteSink;

/// Options for [`ClientRuntime::make_persistent`].
#[derive(Clone, Debug, Default)]
pub struct PersistOptions {
    /// Dataset of the object. Defaults to the configured dataset.
    pub dataset: Option<String>,
    pub alias: Option<String>,
    /// Backend that becomes master. A connected backend is picked at random
    /// when unset.
    pub backend: Option<BackendId>,
    pub read_only: bool,
}

impl PersistOptions {
    pub fn alias(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            ..Self::default()
        }
    }

    pub fn on(mut self, backend: BackendId) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn in_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Client side of the ORB system.
///
/// Owns a local heap of materialized objects, a proxy cache that keeps one
/// instance per identity, and a [`Router`] that sends everything else to
/// the object's master backend. Local modifications made through
/// [`ObjectHandle::update_local`] are written back by the heap, either on
/// an explicit flush or when the sweeper evicts the object.
pub struct ClientRuntime {
    pub(crate) config: ClientConfig,
    pub(crate) router: Router,
    pub(crate) registry: Arc<ClassRegistry>,
    pub(crate) locks: LockManager,
    pub(crate) heap: Arc<HeapManager>,
    pub(crate) proxies: ProxyCache,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl ClientRuntime {
    /// Build a runtime. With `run_sweeper` set this must be called inside a
    /// tokio runtime.
    pub fn new(
        config: ClientConfig,
        directory: Arc<dyn Directory>,
        backends: Arc<BackendPool>,
        registry: Arc<ClassRegistry>,
    ) -> Arc<Self> {
        let router = Router::new(
            directory,
            backends,
            config.retry.clone(),
            config.rpc_timeout(),
        );
        let locks = LockManager::new();
        let sink = Arc::new(RemoteSink::new(router.clone(), Arc::clone(&registry)));
        let heap = Arc::new(HeapManager::new(config.heap.clone(), locks.clone(), sink));
        let sweeper = config.run_sweeper.then(|| heap.spawn_sweeper());
        Arc::new(Self {
            config,
            router,
            registry,
            locks,
            heap,
            proxies: ProxyCache::new(),
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn heap(&self) -> &Arc<HeapManager> {
        &self.heap
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        self.router.directory()
    }

    pub fn backends(&self) -> &Arc<BackendPool> {
        self.router.backends()
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Persist a volatile object and return a handle to it.
    ///
    /// The object graph is encoded by value, so volatile objects reachable
    /// from `obj` become part of its state. `obj` itself is turned into the
    /// local instance of the new identity.
    pub async fn make_persistent(
        self: &Arc<Self>,
        obj: &ObjectRef,
        options: PersistOptions,
    ) -> OrbResult<ObjectHandle> {
        if let Some(id) = obj.identity() {
            return Err(OrbError::already_exists(format!("object {id}")));
        }
        self.registry.require(obj.class_name())?;
        let dataset = options
            .dataset
            .unwrap_or_else(|| self.config.default_dataset.clone());
        names::validate_dataset(&dataset)?;
        if let Some(alias) = &options.alias {
            names::validate_alias(alias)?;
        }

        let state = GraphEncoder::new(&self.registry)
            .encode_state(obj)?
            .to_bytes();
        let backend = match options.backend {
            Some(backend) => backend,
            None => self.pick_backend()?,
        };
        let request = MakePersistentRequest {
            id: ObjectId::new(),
            class_name: obj.class_name().to_string(),
            dataset,
            alias: options.alias,
            state,
            read_only: options.read_only,
        };
        let alias = request.alias.clone();
        let id = self
            .router
            .once(backend, &|api: Arc<dyn BackendApi>| -> RpcFuture<ObjectId> {
                let request = request.clone();
                Box::pin(async move { api.make_persistent(request).await })
            })
            .await?;

        obj.assign_identity(id)?;
        obj.set_hint(Some(backend));
        obj.set_loaded(true);
        self.proxies.register(obj);
        self.heap.put_loaded(id, ObjectRef::clone(obj));
        info!(%id, class = obj.class_name(), %backend, alias = ?alias, "made object persistent");
        Ok(ObjectHandle::new(Arc::clone(self), id, ObjectRef::clone(obj)))
    }

    fn pick_backend(&self) -> OrbResult<BackendId> {
        self.backends()
            .ids()
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| OrbError::unavailable("backend pool", Stage::Rpc, "no backend connected"))
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    /// Handle for a persistent identity. The state is fetched lazily.
    pub async fn get_by_id(self: &Arc<Self>, id: ObjectId) -> OrbResult<ObjectHandle> {
        if let Some(existing) = self.proxies.get(&id) {
            return Ok(ObjectHandle::new(Arc::clone(self), id, existing));
        }
        let metadata = self.directory().get(&id).await?;
        let cell = self.proxies.resolve(
            id,
            &metadata.class_name,
            Some(metadata.master_backend_id),
        );
        Ok(ObjectHandle::new(Arc::clone(self), id, cell))
    }

    /// Handle for the object bound to `alias` in the default dataset.
    pub async fn get_by_alias(self: &Arc<Self>, alias: &str) -> OrbResult<ObjectHandle> {
        let dataset = self.config.default_dataset.clone();
        self.get_by_alias_in(&dataset, alias).await
    }

    pub async fn get_by_alias_in(
        self: &Arc<Self>,
        dataset: &str,
        alias: &str,
    ) -> OrbResult<ObjectHandle> {
        let id = self.directory().resolve_alias(dataset, alias).await?;
        self.get_by_id(id).await
    }

    /// `(alias, id)` bindings in `dataset`, sorted by alias.
    pub async fn aliases(&self, dataset: &str) -> OrbResult<Vec<(String, ObjectId)>> {
        self.directory().list_aliases(dataset).await
    }

    /// Remove an alias binding. The object itself is untouched.
    pub async fn delete_alias(&self, dataset: &str, alias: &str) -> OrbResult<()> {
        self.directory().delete_alias(dataset, alias).await?;
        debug!(dataset, alias, "deleted alias");
        Ok(())
    }

    /// Handle for a persistent object found inside a decoded value.
    pub fn attach(self: &Arc<Self>, obj: &ObjectRef) -> OrbResult<ObjectHandle> {
        let id = obj.identity().ok_or_else(|| {
            OrbError::InvalidArgument(format!(
                "instance {} of {} is not persistent",
                obj.instance(),
                obj.class_name()
            ))
        })?;
        let canonical = self.proxies.get(&id).unwrap_or_else(|| {
            self.proxies.register(obj);
            ObjectRef::clone(obj)
        });
        Ok(ObjectHandle::new(Arc::clone(self), id, canonical))
    }

    // ---------------------------------------------------------------
    // Codec helpers
    // ---------------------------------------------------------------

    pub(crate) fn encode_value(&self, value: &Value) -> OrbResult<Vec<u8>> {
        Ok(GraphEncoder::new(&self.registry)
            .encode_value(value)?
            .to_bytes())
    }

    pub(crate) fn decode_value(&self, bytes: &[u8]) -> OrbResult<Value> {
        let envelope = Envelope::from_bytes(bytes)?;
        Ok(GraphDecoder::new(&self.registry, &self.proxies, &envelope).decode_value()?)
    }

    pub(crate) fn decode_state_into(&self, cell: &ObjectRef, bytes: &[u8]) -> OrbResult<()> {
        let envelope = Envelope::from_bytes(bytes)?;
        GraphDecoder::new(&self.registry, &self.proxies, &envelope).decode_state_into(cell)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Push every locally modified object to its master.
    pub async fn flush_all(&self) -> OrbResult<usize> {
        self.heap.flush_all().await
    }

    /// Stop the sweeper and push pending local modifications.
    pub async fn shutdown(&self) -> OrbResult<()> {
        let sweeper = self.sweeper.lock().expect("lock poisoned").take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        let flushed = self.heap.flush_all().await?;
        info!(flushed, "client runtime stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("router", &self.router)
            .field("heap", &self.heap)
            .field("proxies", &self.proxies.len())
            .finish()
    }
}
