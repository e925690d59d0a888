use async_trait::async_trait;
use orb_types::{BackendId, ObjectId, OrbResult};
use serde::{Deserialize, Serialize};

/// How a backend should treat state pushed to it with
/// [`BackendApi::put_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutMode {
    /// Incoming move: store durably, ready to become master once the
    /// directory names this backend.
    Master,
    /// Incoming replica copy.
    Replica,
    /// New state for an object this backend already masters (client flush).
    Update,
}

/// Everything a backend needs to accept a new persistent object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakePersistentRequest {
    pub id: ObjectId,
    pub class_name: String,
    pub dataset: String,
    pub alias: Option<String>,
    /// Envelope bytes of the object's state.
    pub state: Vec<u8>,
    pub read_only: bool,
}

/// Operations a backend serves to clients and peer backends.
///
/// Arguments, results and states travel as envelope bytes so the same
/// surface works in-process and over frames.
#[async_trait]
pub trait BackendApi: Send + Sync {
    fn backend_id(&self) -> BackendId;

    /// Store a new object, register it (and its alias) and become its master.
    async fn make_persistent(&self, request: MakePersistentRequest) -> OrbResult<ObjectId>;

    /// Invoke `method` with an envelope-encoded argument list. Returns the
    /// envelope-encoded result.
    async fn execute(&self, id: ObjectId, method: &str, args: Vec<u8>) -> OrbResult<Vec<u8>>;

    async fn get_attribute(&self, id: ObjectId, field: &str) -> OrbResult<Vec<u8>>;

    async fn set_attribute(&self, id: ObjectId, field: &str, value: Vec<u8>) -> OrbResult<()>;

    /// Remove `field` from the object. Fails with `DoesNotExist` if it is
    /// not set.
    async fn delete_attribute(&self, id: ObjectId, field: &str) -> OrbResult<()>;

    /// Current state of `id` as envelope bytes.
    async fn get_state(&self, id: ObjectId) -> OrbResult<Vec<u8>>;

    async fn put_state(&self, id: ObjectId, state: Vec<u8>, mode: PutMode) -> OrbResult<()>;

    /// Drop a copy this backend holds without being master of record.
    async fn discard_state(&self, id: ObjectId) -> OrbResult<()>;

    /// Move mastership of `id` to `target` (or a backend of the runtime's
    /// choosing). Must be sent to the current master. Returns the new master.
    async fn move_object(&self, id: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId>;

    /// Create a read replica of `id` on `target` (or a backend of the
    /// runtime's choosing). Returns the replica holder.
    async fn new_replica(&self, id: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId>;

    /// Move every object this backend masters to the other backends,
    /// topping up the least loaded first. Returns the number moved.
    async fn move_all_objects(&self) -> OrbResult<usize>;

    /// Flush every dirty object. Returns the number flushed.
    async fn flush_all(&self) -> OrbResult<usize>;
}
