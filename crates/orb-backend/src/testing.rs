//! Fixtures shared by the unit tests of this crate.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orb_codec::{Envelope, GraphDecoder, GraphEncoder, ProxyCache};
use orb_directory::{Directory, InMemoryDirectory};
use orb_object::{ClassDescriptor, ClassRegistry, Fields, ObjectCell, Value};
use orb_protocol::{BackendApi, BackendPool, MakePersistentRequest};
use orb_store::InMemoryStateStore;
use orb_types::{BackendId, BackendInfo, ObjectId, ObjectMetadata, OrbError, OrbResult, Stage};

use crate::config::BackendConfig;
use crate::runtime::BackendRuntime;

pub fn registry() -> Arc<ClassRegistry> {
    let registry = ClassRegistry::new();
    registry.register(
        ClassDescriptor::new("Counter")
            .field("count")
            .field("label")
            .read_method("get", |fields, _| {
                Ok(fields.get("count").cloned().unwrap_or(Value::Int(0)))
            })
            .write_method("incr", |fields, args| {
                let by = args.first().and_then(Value::as_int).unwrap_or(1);
                let next = fields.get("count").and_then(Value::as_int).unwrap_or(0) + by;
                fields.insert("count".into(), Value::Int(next));
                Ok(Value::Int(next))
            })
            .write_method("fail", |fields, _| {
                fields.insert("count".into(), Value::Int(-1));
                Err("refused".into())
            }),
    );
    Arc::new(registry)
}

pub fn encode_value(registry: &ClassRegistry, value: Value) -> Vec<u8> {
    GraphEncoder::new(registry)
        .encode_value(&value)
        .unwrap()
        .to_bytes()
}

pub fn encode_args(registry: &ClassRegistry, args: Vec<Value>) -> Vec<u8> {
    encode_value(registry, Value::List(args))
}

pub fn decode(registry: &ClassRegistry, bytes: &[u8]) -> Value {
    let envelope = Envelope::from_bytes(bytes).unwrap();
    GraphDecoder::new(registry, &ProxyCache::new(), &envelope)
        .decode_value()
        .unwrap()
}

pub fn counter_state(registry: &ClassRegistry, count: i64) -> Vec<u8> {
    let mut fields = Fields::new();
    fields.insert("count".into(), Value::Int(count));
    let cell = ObjectCell::with_fields("Counter", fields);
    GraphEncoder::new(registry)
        .encode_state(&cell)
        .unwrap()
        .to_bytes()
}

pub fn request(registry: &ClassRegistry, count: i64, alias: Option<&str>) -> MakePersistentRequest {
    MakePersistentRequest {
        id: ObjectId::new(),
        class_name: "Counter".into(),
        dataset: "default".into(),
        alias: alias.map(str::to_string),
        state: counter_state(registry, count),
        read_only: false,
    }
}

/// CAS behaviour of [`FaultyDirectory`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasFault {
    None = 0,
    /// Fail without applying.
    FailBefore = 1,
    /// Apply, then report a failure.
    FailAfter = 2,
    /// Report a lost race without applying.
    Lose = 3,
}

/// Directory whose master CAS can be made to fail and whose lookups can
/// be made to answer late.
#[derive(Default)]
pub struct FaultyDirectory {
    inner: InMemoryDirectory,
    cas: AtomicU8,
    late_get_ms: AtomicU64,
}

impl FaultyDirectory {
    /// The next `get` reads the entry at once but returns it only after
    /// `delay`, so its answer may be stale by then.
    pub fn answer_next_get_late(&self, delay: Duration) {
        self.late_get_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_cas_fault(&self, fault: CasFault) {
        self.cas.store(fault as u8, Ordering::SeqCst);
    }

    fn cas_fault(&self) -> CasFault {
        match self.cas.load(Ordering::SeqCst) {
            1 => CasFault::FailBefore,
            2 => CasFault::FailAfter,
            3 => CasFault::Lose,
            _ => CasFault::None,
        }
    }
}

#[async_trait]
impl Directory for FaultyDirectory {
    async fn register_if_absent(&self, metadata: ObjectMetadata) -> OrbResult<bool> {
        self.inner.register_if_absent(metadata).await
    }
    async fn get(&self, id: &ObjectId) -> OrbResult<ObjectMetadata> {
        let answer = self.inner.get(id).await;
        let late = self.late_get_ms.swap(0, Ordering::SeqCst);
        if late > 0 {
            tokio::time::sleep(Duration::from_millis(late)).await;
        }
        answer
    }
    async fn compare_and_swap_master(
        &self,
        id: &ObjectId,
        expected: BackendId,
        new_master: BackendId,
    ) -> OrbResult<bool> {
        let injected = OrbError::unavailable("directory", Stage::Directory, "injected");
        match self.cas_fault() {
            CasFault::None => self.inner.compare_and_swap_master(id, expected, new_master).await,
            CasFault::FailBefore => Err(injected),
            CasFault::Lose => Ok(false),
            CasFault::FailAfter => {
                self.inner
                    .compare_and_swap_master(id, expected, new_master)
                    .await?;
                Err(injected)
            }
        }
    }
    async fn add_replica_if_absent(&self, id: &ObjectId, backend: BackendId) -> OrbResult<bool> {
        self.inner.add_replica_if_absent(id, backend).await
    }
    async fn register_alias_if_absent(
        &self,
        dataset: &str,
        alias: &str,
        id: &ObjectId,
    ) -> OrbResult<bool> {
        self.inner.register_alias_if_absent(dataset, alias, id).await
    }
    async fn resolve_alias(&self, dataset: &str, alias: &str) -> OrbResult<ObjectId> {
        self.inner.resolve_alias(dataset, alias).await
    }
    async fn delete_alias(&self, dataset: &str, alias: &str) -> OrbResult<()> {
        self.inner.delete_alias(dataset, alias).await
    }
    async fn list_aliases(&self, dataset: &str) -> OrbResult<Vec<(String, ObjectId)>> {
        self.inner.list_aliases(dataset).await
    }
    async fn objects(&self) -> OrbResult<Vec<ObjectMetadata>> {
        self.inner.objects().await
    }
    async fn delete_object(&self, id: &ObjectId) -> OrbResult<()> {
        self.inner.delete_object(id).await
    }
    async fn register_backend(&self, info: BackendInfo) -> OrbResult<()> {
        self.inner.register_backend(info).await
    }
    async fn unregister_backend(&self, id: &BackendId) -> OrbResult<bool> {
        self.inner.unregister_backend(id).await
    }
    async fn backends(&self) -> OrbResult<Vec<BackendInfo>> {
        self.inner.backends().await
    }
}

/// Started backends sharing one directory and one peer pool.
pub struct Cluster {
    pub directory: Arc<FaultyDirectory>,
    pub pool: Arc<BackendPool>,
    pub registry: Arc<ClassRegistry>,
    pub backends: Vec<Arc<BackendRuntime>>,
}

impl Cluster {
    pub async fn start(n: usize) -> Self {
        let directory = Arc::new(FaultyDirectory::default());
        let pool = Arc::new(BackendPool::new());
        let registry = registry();
        let mut backends = Vec::new();
        for i in 0..n {
            let config = BackendConfig {
                lock_timeout_ms: 200,
                transfer_timeout_ms: 200,
                run_sweeper: false,
                ..BackendConfig::named(format!("b{i}"))
            };
            let backend = BackendRuntime::new(
                config,
                directory.clone(),
                Arc::new(InMemoryStateStore::new()),
                registry.clone(),
                pool.clone(),
            );
            backend.start().await.unwrap();
            backends.push(backend);
        }
        Self {
            directory,
            pool,
            registry,
            backends,
        }
    }

    pub fn backend(&self, i: usize) -> &Arc<BackendRuntime> {
        &self.backends[i]
    }

    /// Persist a counter on backend `i`.
    pub async fn counter(&self, i: usize, count: i64) -> ObjectId {
        self.backends[i]
            .make_persistent(request(&self.registry, count, None))
            .await
            .unwrap()
    }

    pub async fn read_count(&self, i: usize, id: ObjectId) -> OrbResult<i64> {
        let bytes = self.backends[i]
            .execute(id, "get", encode_args(&self.registry, vec![]))
            .await?;
        Ok(decode(&self.registry, &bytes).as_int().unwrap())
    }

    pub async fn incr(&self, i: usize, id: ObjectId) -> OrbResult<i64> {
        let bytes = self.backends[i]
            .execute(id, "incr", encode_args(&self.registry, vec![Value::Int(1)]))
            .await?;
        Ok(decode(&self.registry, &bytes).as_int().unwrap())
    }

    pub async fn master(&self, id: ObjectId) -> BackendId {
        self.directory.get(&id).await.unwrap().master_backend_id
    }
}

pub fn count_of(fields: &Fields) -> Option<i64> {
    fields.get("count").and_then(Value::as_int)
}
