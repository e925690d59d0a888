use std::sync::Arc;

use async_trait::async_trait;
use orb_codec::GraphEncoder;
use orb_heap::FlushSink;
use orb_object::{ClassRegistry, ObjectRef};
use orb_protocol::PutMode;
use orb_types::{ObjectId, OrbResult};
use tracing::debug;

use crate::router::Router;

/// Pushes locally modified state to the object's master backend.
pub struct RemoteSink {
    router: Router,
    registry: Arc<ClassRegistry>,
}

impl RemoteSink {
    pub fn new(router: Router, registry: Arc<ClassRegistry>) -> Self {
        Self { router, registry }
    }
}

#[async_trait]
impl FlushSink for RemoteSink {
    async fn flush(&self, id: ObjectId, instance: &ObjectRef) -> OrbResult<()> {
        let state = GraphEncoder::new(&self.registry)
            .encode_state(instance)?
            .to_bytes();
        let ((), served) = self
            .router
            .call(id, instance.hint(), |api| {
                let state = state.clone();
                Box::pin(async move { api.put_state(id, state, PutMode::Update).await })
            })
            .await?;
        instance.set_hint(Some(served));
        debug!(%id, backend = %served, "pushed local state");
        Ok(())
    }
}
