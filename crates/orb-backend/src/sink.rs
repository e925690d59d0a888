use std::sync::Arc;

use async_trait::async_trait;
use orb_codec::GraphEncoder;
use orb_heap::FlushSink;
use orb_object::{ClassRegistry, ObjectRef};
use orb_store::{StateStore, StoredState};
use orb_types::{ObjectId, OrbResult, Stage};
use tracing::trace;

/// Writes dirty heap entries to the backend's durable state store.
pub struct StoreSink {
    store: Arc<dyn StateStore>,
    registry: Arc<ClassRegistry>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn StateStore>, registry: Arc<ClassRegistry>) -> Self {
        Self { store, registry }
    }
}

#[async_trait]
impl FlushSink for StoreSink {
    async fn flush(&self, id: ObjectId, instance: &ObjectRef) -> OrbResult<()> {
        let envelope = GraphEncoder::new(&self.registry).encode_state(instance)?;
        let state = StoredState::new(instance.class_name(), envelope.to_bytes());
        trace!(%id, bytes = state.size(), "writing object state");
        self.store.write(&id, &state).map_err(|e| e.at(Stage::Flush))
    }
}
