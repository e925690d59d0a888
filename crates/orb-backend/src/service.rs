//! [`BackendApi`] for [`BackendRuntime`].

use async_trait::async_trait;
use orb_codec::{Envelope, GraphDecoder, ProxyResolver};
use orb_directory::{validate_alias, validate_dataset};
use orb_object::Value;
use orb_protocol::{BackendApi, MakePersistentRequest, PutMode};
use orb_store::StoredState;
use orb_types::{BackendId, LockMode, ObjectId, ObjectMetadata, OrbError, OrbResult, Stage};
use tracing::{debug, info, warn};

use crate::relocation::RelocationKind;
use crate::runtime::{BackendRuntime, Ownership, Role};

impl BackendRuntime {
    /// Undo the parts of a failed `make_persistent` that reached shared
    /// or durable state.
    async fn roll_back_creation(&self, request: &MakePersistentRequest, stored: bool) {
        if stored {
            if let Err(e) = self.store.delete(&request.id) {
                warn!(id = %request.id, error = %e, "could not roll back stored state");
            }
        }
        if let Some(alias) = &request.alias {
            if let Err(e) = self.directory.delete_alias(&request.dataset, alias).await {
                warn!(id = %request.id, alias, error = %e, "could not roll back alias");
            }
        }
    }

    fn split_args(id: ObjectId, args: Value) -> OrbResult<Vec<Value>> {
        match args {
            Value::List(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(OrbError::InvalidArgument(format!(
                "arguments for {id} must be a list, got {}",
                other.kind()
            ))),
        }
    }

    /// Store an incoming copy from a move or replication.
    async fn accept_copy(&self, id: ObjectId, state: Vec<u8>, mode: PutMode) -> OrbResult<()> {
        if let Some(metadata) = self.directory.try_get(&id).await? {
            if metadata.is_master(&self.id) {
                return Err(OrbError::InvalidArgument(format!(
                    "{id} is already mastered here"
                )));
            }
        }
        let _guard = self
            .locks
            .acquire(id, LockMode::Write, Some(self.config.lock_timeout()))
            .await?;
        let class_name = self.validate_state(id, &state)?;
        self.store
            .write(&id, &StoredState::new(class_name, state))
            .map_err(|e| e.at(Stage::Transfer))?;
        // Any older local copy is stale; the next access reloads.
        self.forget_ownership(&id);
        if let Some(stale) = self.heap.remove(&id) {
            stale.set_loaded(false);
        }
        debug!(backend = %self.id, %id, ?mode, "accepted incoming copy");
        Ok(())
    }

    /// Replace the state of an object mastered here with a client's copy.
    async fn accept_update(&self, id: ObjectId, state: Vec<u8>) -> OrbResult<()> {
        let _pin = self.heap.pin(id);
        let (_guard, ownership) = self.lock_owned(id, LockMode::Write).await?;
        let instance = self.ensure_loaded(id, &ownership.class_name).await?;
        let envelope = Envelope::from_bytes(&state)?;
        GraphDecoder::new(&self.registry, &self.proxies, &envelope).decode_state_into(&instance)?;
        self.heap.mark_dirty(&id);
        debug!(backend = %self.id, %id, "applied client state");
        Ok(())
    }
}

#[async_trait]
impl BackendApi for BackendRuntime {
    fn backend_id(&self) -> BackendId {
        self.id
    }

    async fn make_persistent(&self, request: MakePersistentRequest) -> OrbResult<ObjectId> {
        self.check_running()?;
        validate_dataset(&request.dataset)?;
        if let Some(alias) = &request.alias {
            validate_alias(alias)?;
        }
        self.registry.require(&request.class_name)?;
        let id = request.id;

        let taken = self.store.exists(&id).map_err(|e| e.at(Stage::Load))?
            || self.directory.try_get(&id).await?.is_some();
        if taken {
            return Err(OrbError::already_exists(format!("object {id}")));
        }

        let envelope = Envelope::from_bytes(&request.state)?;
        let instance = self.proxies.resolve(id, &request.class_name, Some(self.id));
        GraphDecoder::new(&self.registry, &self.proxies, &envelope).decode_state_into(&instance)?;

        if let Some(alias) = &request.alias {
            if !self
                .directory
                .register_alias_if_absent(&request.dataset, alias, &id)
                .await?
            {
                return Err(OrbError::already_exists(format!(
                    "alias {}/{alias}",
                    request.dataset
                )));
            }
        }

        let stored = StoredState::new(&request.class_name, request.state.clone());
        if let Err(e) = self.store.write(&id, &stored) {
            self.roll_back_creation(&request, false).await;
            return Err(e.at(Stage::Flush));
        }

        let mut metadata = ObjectMetadata::new(id, &request.class_name, &request.dataset, self.id)
            .read_only(request.read_only);
        metadata.alias = request.alias.clone();
        match self.directory.register_if_absent(metadata).await {
            Ok(true) => {}
            Ok(false) => {
                self.roll_back_creation(&request, true).await;
                return Err(OrbError::already_exists(format!("object {id}")));
            }
            Err(e) => {
                self.roll_back_creation(&request, true).await;
                return Err(e);
            }
        }

        self.set_ownership(
            id,
            Ownership {
                role: Role::Master,
                class_name: request.class_name.clone(),
                read_only: request.read_only,
                master: self.id,
            },
        );
        self.heap.put_loaded(id, instance);
        info!(
            backend = %self.id,
            %id,
            class = %request.class_name,
            dataset = %request.dataset,
            alias = ?request.alias,
            "made object persistent"
        );
        Ok(id)
    }

    async fn execute(&self, id: ObjectId, method: &str, args: Vec<u8>) -> OrbResult<Vec<u8>> {
        self.check_running()?;
        let _pin = self.heap.pin(id);
        let ownership = self.ownership(id).await?;
        let class = self.registry.require(&ownership.class_name)?;
        let mode = class.require_method(method)?.mode();

        let (_guard, ownership) = self.lock_owned(id, mode).await?;
        let instance = self.ensure_loaded(id, &ownership.class_name).await?;
        let args = Self::split_args(id, self.decode_value(&args)?)?;
        let result = class.call(method, &instance, &args)?;
        if mode.is_write() {
            self.heap.mark_dirty(&id);
        }
        debug!(backend = %self.id, %id, method, %mode, "executed method");
        self.encode_value(&result)
    }

    async fn get_attribute(&self, id: ObjectId, field: &str) -> OrbResult<Vec<u8>> {
        self.check_running()?;
        let _pin = self.heap.pin(id);
        let (_guard, ownership) = self.lock_owned(id, LockMode::Read).await?;
        let instance = self.ensure_loaded(id, &ownership.class_name).await?;
        let value = match instance.get(field) {
            Some(value) => value,
            None => {
                let class = self.registry.require(&ownership.class_name)?;
                if !class.declared_fields().any(|f| f == field) {
                    return Err(OrbError::does_not_exist(format!(
                        "attribute {}.{field}",
                        ownership.class_name
                    )));
                }
                Value::Null
            }
        };
        self.encode_value(&value)
    }

    async fn set_attribute(&self, id: ObjectId, field: &str, value: Vec<u8>) -> OrbResult<()> {
        self.check_running()?;
        let _pin = self.heap.pin(id);
        let (_guard, ownership) = self.lock_owned(id, LockMode::Write).await?;
        let instance = self.ensure_loaded(id, &ownership.class_name).await?;
        let value = self.decode_value(&value)?;
        instance.set(field, value);
        self.heap.mark_dirty(&id);
        debug!(backend = %self.id, %id, field, "set attribute");
        Ok(())
    }

    async fn delete_attribute(&self, id: ObjectId, field: &str) -> OrbResult<()> {
        self.check_running()?;
        let _pin = self.heap.pin(id);
        let (_guard, ownership) = self.lock_owned(id, LockMode::Write).await?;
        let instance = self.ensure_loaded(id, &ownership.class_name).await?;
        if instance.remove(field).is_none() {
            return Err(OrbError::does_not_exist(format!(
                "attribute {}.{field} of {id}",
                ownership.class_name
            )));
        }
        self.heap.mark_dirty(&id);
        debug!(backend = %self.id, %id, field, "deleted attribute");
        Ok(())
    }

    async fn get_state(&self, id: ObjectId) -> OrbResult<Vec<u8>> {
        self.check_running()?;
        let _pin = self.heap.pin(id);
        let (_guard, ownership) = self.lock_owned(id, LockMode::Read).await?;
        let instance = self.ensure_loaded(id, &ownership.class_name).await?;
        self.encode_state(&instance)
    }

    async fn put_state(&self, id: ObjectId, state: Vec<u8>, mode: PutMode) -> OrbResult<()> {
        self.check_running()?;
        match mode {
            PutMode::Master | PutMode::Replica => self.accept_copy(id, state, mode).await,
            PutMode::Update => self.accept_update(id, state).await,
        }
    }

    async fn discard_state(&self, id: ObjectId) -> OrbResult<()> {
        if let Some(metadata) = self.directory.try_get(&id).await? {
            if metadata.holds_copy(&self.id) {
                return Err(OrbError::InvalidArgument(format!(
                    "{id} is registered here; refusing to discard it"
                )));
            }
        }
        let _guard = self
            .locks
            .acquire(id, LockMode::Write, Some(self.config.lock_timeout()))
            .await?;
        self.drop_local_copy(&id, None);
        debug!(backend = %self.id, %id, "discarded local copy");
        Ok(())
    }

    async fn move_object(&self, id: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId> {
        Ok(self.relocate(id, RelocationKind::Move, target).await?.target)
    }

    async fn new_replica(&self, id: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId> {
        Ok(self
            .relocate(id, RelocationKind::Replicate, target)
            .await?
            .target)
    }

    async fn move_all_objects(&self) -> OrbResult<usize> {
        self.move_all().await
    }

    async fn flush_all(&self) -> OrbResult<usize> {
        self.heap.flush_all().await
    }
}
