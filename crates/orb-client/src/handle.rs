use std::fmt;
use std::sync::Arc;

use orb_directory::names;
use orb_lock::ObjectLockGuard;
use orb_object::{Fields, Method, ObjectRef, Value};
use orb_protocol::BackendApi;
use orb_types::{BackendId, LockMode, ObjectId, ObjectMetadata, OrbError, OrbResult, Stage};
use tracing::{debug, warn};

use crate::router::RpcFuture;
use crate::runtime::ClientRuntime;

/// Typed wrapper over an [`ObjectHandle`] for one registered class.
///
/// ```ignore
/// struct Counter(ObjectHandle);
///
/// impl ProxyType for Counter {
///     const CLASS_NAME: &'static str = "Counter";
///     fn from_handle(handle: ObjectHandle) -> Self { Counter(handle) }
///     fn handle(&self) -> &ObjectHandle { &self.0 }
/// }
///
/// let counter: Counter = client.get_by_alias("hits").await?.downcast()?;
/// ```
pub trait ProxyType: Sized {
    const CLASS_NAME: &'static str;

    fn from_handle(handle: ObjectHandle) -> Self;

    fn handle(&self) -> &ObjectHandle;
}

/// Reference to a persistent object through a [`ClientRuntime`].
///
/// Reads and read methods are served from the local heap when the object
/// is materialized there and go to the master backend otherwise. Write
/// methods and attribute writes always run at the master; the local copy
/// is then dropped (or updated in place for attributes) so it never hides
/// a newer remote state.
///
/// Every path that pushes or replaces the local copy holds the client-side
/// write lock from the flush to the end, so a concurrent
/// [`update_local`](Self::update_local) lands either before the flush or
/// after the local copy is gone, never in between.
#[derive(Clone)]
pub struct ObjectHandle {
    runtime: Arc<ClientRuntime>,
    id: ObjectId,
    cell: ObjectRef,
}

impl ObjectHandle {
    pub(crate) fn new(runtime: Arc<ClientRuntime>, id: ObjectId, cell: ObjectRef) -> Self {
        Self { runtime, id, cell }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class_name(&self) -> &str {
        self.cell.class_name()
    }

    /// The local instance. Other handles to the same identity share it.
    pub fn object(&self) -> &ObjectRef {
        &self.cell
    }

    pub(crate) fn runtime(&self) -> &Arc<ClientRuntime> {
        &self.runtime
    }

    /// Last known master.
    pub fn hint(&self) -> Option<BackendId> {
        self.cell.hint()
    }

    /// Whether the state is materialized in the local heap.
    pub fn is_loaded(&self) -> bool {
        self.cell.is_loaded() && self.runtime.heap.contains(&self.id)
    }

    pub fn is_dirty(&self) -> bool {
        self.runtime.heap.is_dirty(&self.id)
    }

    pub async fn metadata(&self) -> OrbResult<ObjectMetadata> {
        self.runtime.directory().get(&self.id).await
    }

    /// Wrap this handle in its typed proxy.
    pub fn downcast<T: ProxyType>(self) -> OrbResult<T> {
        if self.class_name() != T::CLASS_NAME {
            return Err(OrbError::InvalidArgument(format!(
                "object {} is a {}, not a {}",
                self.id,
                self.class_name(),
                T::CLASS_NAME
            )));
        }
        Ok(T::from_handle(self))
    }

    // ---------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------

    /// Read one field.
    pub async fn get(&self, field: &str) -> OrbResult<Value> {
        if let Some(_guard) = self.try_local(LockMode::Read).await? {
            return match self.cell.get(field) {
                Some(value) => Ok(value),
                None => self.missing_field(field),
            };
        }
        let field_name = field.to_string();
        let id = self.id;
        let bytes = self
            .call(move |api| -> RpcFuture<Vec<u8>> {
                let field = field_name.clone();
                Box::pin(async move { api.get_attribute(id, &field).await })
            })
            .await?;
        self.runtime.decode_value(&bytes)
    }

    /// Write one field at the master, then mirror it locally.
    pub async fn set(&self, field: &str, value: Value) -> OrbResult<()> {
        let encoded = self.runtime.encode_value(&value)?;
        let _guard = self.lock(LockMode::Write).await?;
        self.flush().await?;
        let field_name = field.to_string();
        let id = self.id;
        self.call(move |api| -> RpcFuture<()> {
            let field = field_name.clone();
            let value = encoded.clone();
            Box::pin(async move { api.set_attribute(id, &field, value).await })
        })
        .await?;
        if self.is_loaded() {
            self.cell.set(field, value);
        }
        Ok(())
    }

    /// Unset one field at the master, then locally. Unsetting a field that
    /// has no value is `DoesNotExist`.
    pub async fn delete(&self, field: &str) -> OrbResult<()> {
        let _guard = self.lock(LockMode::Write).await?;
        self.flush().await?;
        let field_name = field.to_string();
        let id = self.id;
        self.call(move |api| -> RpcFuture<()> {
            let field = field_name.clone();
            Box::pin(async move { api.delete_attribute(id, &field).await })
        })
        .await?;
        if self.is_loaded() {
            self.cell.remove(field);
        }
        Ok(())
    }

    fn missing_field(&self, field: &str) -> OrbResult<Value> {
        let class = self.runtime.registry.require(self.class_name())?;
        if class.declared_fields().any(|declared| declared == field) {
            Ok(Value::Null)
        } else {
            Err(OrbError::does_not_exist(format!(
                "field {}.{field} of {}",
                self.class_name(),
                self.id
            )))
        }
    }

    // ---------------------------------------------------------------
    // Methods
    // ---------------------------------------------------------------

    /// Invoke a method of the object's class.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> OrbResult<Value> {
        let class = self.runtime.registry.require(self.class_name())?;
        let kind = class.require_method(method)?;
        if let Method::Read(_) = kind {
            if let Some(_guard) = self.try_local(LockMode::Read).await? {
                debug!(id = %self.id, method, "served read locally");
                return class.call(method, &self.cell, &args);
            }
        }

        let encoded = self.runtime.encode_value(&Value::List(args))?;
        let _guard = match kind {
            Method::Write(_) => Some(self.lock(LockMode::Write).await?),
            Method::Read(_) => None,
        };
        self.flush().await?;
        let method_name = method.to_string();
        let id = self.id;
        let bytes = self
            .call(move |api| -> RpcFuture<Vec<u8>> {
                let method = method_name.clone();
                let args = encoded.clone();
                Box::pin(async move { api.execute(id, &method, args).await })
            })
            .await?;
        if kind.is_write() {
            self.invalidate();
        }
        self.runtime.decode_value(&bytes)
    }

    // ---------------------------------------------------------------
    // Local copy
    // ---------------------------------------------------------------

    /// Materialize the state locally unless it already is.
    pub async fn load(&self) -> OrbResult<()> {
        if self.is_loaded() {
            self.runtime.heap.get(&self.id);
            return Ok(());
        }
        self.fetch().await
    }

    /// Push local changes, then replace the local copy with the master's
    /// current state.
    pub async fn refresh(&self) -> OrbResult<()> {
        self.fetch().await
    }

    /// Replace the local copy with the master's state. Pending changes are
    /// pushed first, under the same lock, so none are overwritten.
    async fn fetch(&self) -> OrbResult<()> {
        let _pin = self.runtime.heap.pin(self.id);
        let _guard = self.lock(LockMode::Write).await?;
        self.flush().await?;
        let id = self.id;
        let bytes = self
            .call(move |api| -> RpcFuture<Vec<u8>> {
                Box::pin(async move { api.get_state(id).await })
            })
            .await?;
        self.runtime.decode_state_into(&self.cell, &bytes)?;
        self.cell.set_loaded(true);
        self.runtime.heap.put_loaded(self.id, ObjectRef::clone(&self.cell));
        debug!(%id, "materialized object locally");
        Ok(())
    }

    /// Modify the local copy. The change reaches the master on
    /// [`flush`](Self::flush), [`ClientRuntime::flush_all`] or eviction.
    ///
    /// `f` runs on a working copy that replaces the fields only when it
    /// returns `Ok`.
    pub async fn update_local<R>(
        &self,
        f: impl FnOnce(&mut Fields) -> Result<R, String>,
    ) -> OrbResult<R> {
        let _pin = self.runtime.heap.pin(self.id);
        let _guard = self.lock_loaded(LockMode::Write).await?;
        let mut working = self.cell.snapshot();
        let result = f(&mut working).map_err(|message| OrbError::MethodFailed {
            id: self.id,
            method: "update_local".into(),
            message,
        })?;
        self.cell.replace_fields(working);
        self.runtime.heap.mark_dirty(&self.id);
        Ok(result)
    }

    /// Push local changes to the master. Returns `false` if there were none.
    pub async fn flush(&self) -> OrbResult<bool> {
        self.runtime.heap.flush(self.id).await
    }

    /// Push local changes and drop the local copy.
    pub async fn unload(&self) -> OrbResult<bool> {
        self.runtime.heap.unload(self.id).await
    }

    /// Drop the local copy after a remote write. The caller holds the
    /// write lock.
    fn invalidate(&self) {
        if self.runtime.heap.remove_clean(&self.id) {
            self.cell.set_loaded(false);
            debug!(id = %self.id, "dropped stale local copy");
        } else {
            warn!(id = %self.id, "kept local copy with unflushed changes");
        }
    }

    async fn lock(&self, mode: LockMode) -> OrbResult<ObjectLockGuard> {
        self.runtime
            .locks
            .acquire(self.id, mode, Some(self.runtime.config.lock_timeout()))
            .await
    }

    /// Lock the local copy if there is one.
    async fn try_local(&self, mode: LockMode) -> OrbResult<Option<ObjectLockGuard>> {
        if !self.is_loaded() {
            return Ok(None);
        }
        let guard = self.lock(mode).await?;
        // The sweeper may have evicted the copy while we waited.
        if self.is_loaded() {
            self.runtime.heap.get(&self.id);
            Ok(Some(guard))
        } else {
            Ok(None)
        }
    }

    /// Lock the local copy, materializing it first if needed.
    async fn lock_loaded(&self, mode: LockMode) -> OrbResult<ObjectLockGuard> {
        for _ in 0..2 {
            self.load().await?;
            if let Some(guard) = self.try_local(mode).await? {
                return Ok(guard);
            }
        }
        Err(OrbError::unavailable(
            self.id,
            Stage::Load,
            "local copy evicted while loading",
        ))
    }

    // ---------------------------------------------------------------
    // Placement
    // ---------------------------------------------------------------

    /// Bind `alias` to this object in its dataset. An alias already bound
    /// (to any object) is `AlreadyExists`.
    pub async fn add_alias(&self, alias: &str) -> OrbResult<()> {
        names::validate_alias(alias)?;
        let metadata = self.metadata().await?;
        if !self
            .runtime
            .directory()
            .register_alias_if_absent(&metadata.dataset, alias, &self.id)
            .await?
        {
            return Err(OrbError::already_exists(format!(
                "alias {}/{alias}",
                metadata.dataset
            )));
        }
        debug!(id = %self.id, dataset = %metadata.dataset, alias, "added alias");
        Ok(())
    }

    /// Move mastership to `target`, or to a backend the current master
    /// picks. Returns the new master.
    pub async fn move_to(&self, target: Option<BackendId>) -> OrbResult<BackendId> {
        self.flush().await?;
        let id = self.id;
        let new_master = self
            .call(move |api| -> RpcFuture<BackendId> {
                Box::pin(async move { api.move_object(id, target).await })
            })
            .await?;
        self.cell.set_hint(Some(new_master));
        Ok(new_master)
    }

    /// Create a read replica on `target`, or on a backend the master picks.
    /// Returns the replica holder.
    pub async fn replicate(&self, target: Option<BackendId>) -> OrbResult<BackendId> {
        self.flush().await?;
        let id = self.id;
        self.call(move |api| -> RpcFuture<BackendId> {
            Box::pin(async move { api.new_replica(id, target).await })
        })
        .await
    }

    /// Route `op` to the master and remember who answered.
    async fn call<T, F>(&self, op: F) -> OrbResult<T>
    where
        F: Fn(Arc<dyn BackendApi>) -> RpcFuture<T>,
    {
        let (value, served) = self.runtime.router.call(self.id, self.cell.hint(), op).await?;
        self.cell.set_hint(Some(served));
        Ok(value)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("class", &self.class_name())
            .field("hint", &self.hint())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ObjectHandle {}
