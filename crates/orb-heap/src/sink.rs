use async_trait::async_trait;
use orb_object::ObjectRef;
use orb_types::{ObjectId, OrbResult};

/// Destination for dirty object state.
///
/// A backend writes to its durable state store; a client pushes the state
/// to the object's master backend. Implementations must not return `Ok`
/// unless the state is safely at the backend-of-record.
#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn flush(&self, id: ObjectId, instance: &ObjectRef) -> OrbResult<()>;
}
