use async_trait::async_trait;
use orb_types::{BackendId, BackendInfo, ObjectId, ObjectMetadata, OrbResult};

/// Durable mapping from object identity to location metadata.
///
/// Implementations must make every method atomic with respect to the
/// others: two racing `register_if_absent` (or `register_alias_if_absent`)
/// calls for the same key see exactly one `true`, and a
/// `compare_and_swap_master` never applies against a stale master.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Register metadata for a new identity. Returns `false` if the
    /// identity is already registered.
    async fn register_if_absent(&self, metadata: ObjectMetadata) -> OrbResult<bool>;

    /// Metadata for `id`, or `DoesNotExist`.
    async fn get(&self, id: &ObjectId) -> OrbResult<ObjectMetadata>;

    /// Set the master of `id` to `new_master` if it is currently
    /// `expected`. The new master is dropped from the replica set. Returns
    /// `false` when the current master differs.
    async fn compare_and_swap_master(
        &self,
        id: &ObjectId,
        expected: BackendId,
        new_master: BackendId,
    ) -> OrbResult<bool>;

    /// Add `backend` to the replica set. Returns `false` if it already
    /// holds a copy (as replica or master).
    async fn add_replica_if_absent(&self, id: &ObjectId, backend: BackendId) -> OrbResult<bool>;

    /// Bind `alias` in `dataset` to `id`. Returns `false` if the alias is
    /// already bound.
    async fn register_alias_if_absent(
        &self,
        dataset: &str,
        alias: &str,
        id: &ObjectId,
    ) -> OrbResult<bool>;

    /// Identity bound to `alias`, or `DoesNotExist`.
    async fn resolve_alias(&self, dataset: &str, alias: &str) -> OrbResult<ObjectId>;

    /// Remove an alias binding, or `DoesNotExist`.
    async fn delete_alias(&self, dataset: &str, alias: &str) -> OrbResult<()>;

    /// All `(alias, id)` bindings in `dataset`, sorted by alias.
    async fn list_aliases(&self, dataset: &str) -> OrbResult<Vec<(String, ObjectId)>>;

    /// Metadata of every registered object, sorted by id.
    async fn objects(&self) -> OrbResult<Vec<ObjectMetadata>>;

    /// Remove the metadata of `id` and its alias binding, if any.
    async fn delete_object(&self, id: &ObjectId) -> OrbResult<()>;

    /// Advertise a backend (create or replace).
    async fn register_backend(&self, info: BackendInfo) -> OrbResult<()>;

    /// Withdraw a backend. Returns `true` if it was registered.
    async fn unregister_backend(&self, id: &BackendId) -> OrbResult<bool>;

    /// All advertised backends, sorted by id.
    async fn backends(&self) -> OrbResult<Vec<BackendInfo>>;

    /// Metadata for `id`, or `None` if it is not registered.
    async fn try_get(&self, id: &ObjectId) -> OrbResult<Option<ObjectMetadata>> {
        match self.get(id).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(orb_types::OrbError::DoesNotExist { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current master of `id`.
    async fn master_of(&self, id: &ObjectId) -> OrbResult<BackendId> {
        Ok(self.get(id).await?.master_backend_id)
    }
}
