use orb_types::ObjectId;

use crate::error::StoreResult;
use crate::state::StoredState;

/// Durable per-object state storage.
///
/// Implementations must satisfy:
/// - `write` replaces any previous state for the identity atomically; a
///   reader sees either the old or the new state, never a mix.
/// - A successful `write` is durable before it returns.
/// - All I/O errors are propagated, never silently ignored.
pub trait StateStore: Send + Sync {
    /// Read the state of `id`. Returns `Ok(None)` if absent.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredState>>;

    /// Write (or replace) the state of `id`.
    fn write(&self, id: &ObjectId, state: &StoredState) -> StoreResult<()>;

    /// Delete the state of `id`. Returns `true` if it existed.
    fn delete(&self, id: &ObjectId) -> StoreResult<bool>;

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.read(id)?.is_some())
    }

    /// All stored identities, sorted.
    fn ids(&self) -> StoreResult<Vec<ObjectId>>;
}
