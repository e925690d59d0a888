use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orb_types::{BackendId, ObjectId, OrbError, OrbResult};
use tracing::{debug, warn};

use crate::api::{BackendApi, MakePersistentRequest, PutMode};
use crate::codec::FrameCodec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;

/// Carries one request frame to a backend and returns its response frame.
#[async_trait]
pub trait FrameChannel: Send + Sync {
    async fn round_trip(&self, frame: Vec<u8>) -> ProtocolResult<Vec<u8>>;
}

/// A [`BackendApi`] that reaches a remote backend through frames.
pub struct FramedBackend {
    id: BackendId,
    channel: Arc<dyn FrameChannel>,
    timeout: Duration,
}

impl FramedBackend {
    pub fn new(id: BackendId, channel: Arc<dyn FrameChannel>, timeout: Duration) -> Self {
        Self {
            id,
            channel,
            timeout,
        }
    }

    fn target(&self) -> String {
        format!("backend {}", self.id.short_id())
    }

    async fn call(&self, request: Message) -> OrbResult<Message> {
        let name = request.type_name();
        let frame = FrameCodec::encode(&request).map_err(|e| e.into_orb(self.target()))?;
        let reply = tokio::time::timeout(self.timeout, self.channel.round_trip(frame))
            .await
            .map_err(|_| ProtocolError::Timeout(self.timeout))
            .and_then(|r| r)
            .and_then(|bytes| FrameCodec::decode(&bytes).map(|(msg, _)| msg))
            .map_err(|e| {
                debug!(backend = %self.id, request = name, error = %e, "rpc failed");
                e.into_orb(self.target())
            })?;
        match reply {
            Message::Error(err) => Err(err),
            msg => Ok(msg),
        }
    }

    fn unexpected(&self, expected: &'static str, found: &Message) -> OrbError {
        ProtocolError::UnexpectedResponse {
            expected,
            found: found.type_name(),
        }
        .into_orb(self.target())
    }

    async fn call_done(&self, request: Message) -> OrbResult<()> {
        match self.call(request).await? {
            Message::Done => Ok(()),
            other => Err(self.unexpected("Done", &other)),
        }
    }

    async fn call_payload(&self, request: Message) -> OrbResult<Vec<u8>> {
        match self.call(request).await? {
            Message::Payload(bytes) => Ok(bytes),
            other => Err(self.unexpected("Payload", &other)),
        }
    }

    async fn call_count(&self, request: Message) -> OrbResult<usize> {
        match self.call(request).await? {
            Message::Count(n) => Ok(n as usize),
            other => Err(self.unexpected("Count", &other)),
        }
    }

    async fn call_backend(&self, request: Message) -> OrbResult<BackendId> {
        match self.call(request).await? {
            Message::Backend(id) => Ok(id),
            other => Err(self.unexpected("Backend", &other)),
        }
    }
}

impl fmt::Debug for FramedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedBackend")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl BackendApi for FramedBackend {
    fn backend_id(&self) -> BackendId {
        self.id
    }

    async fn make_persistent(&self, request: MakePersistentRequest) -> OrbResult<ObjectId> {
        match self.call(Message::MakePersistent(request)).await? {
            Message::Identity(id) => Ok(id),
            other => Err(self.unexpected("Identity", &other)),
        }
    }

    async fn execute(&self, id: ObjectId, method: &str, args: Vec<u8>) -> OrbResult<Vec<u8>> {
        self.call_payload(Message::Execute {
            id,
            method: method.to_string(),
            args,
        })
        .await
    }

    async fn get_attribute(&self, id: ObjectId, field: &str) -> OrbResult<Vec<u8>> {
        self.call_payload(Message::GetAttribute {
            id,
            field: field.to_string(),
        })
        .await
    }

    async fn set_attribute(&self, id: ObjectId, field: &str, value: Vec<u8>) -> OrbResult<()> {
        self.call_done(Message::SetAttribute {
            id,
            field: field.to_string(),
            value,
        })
        .await
    }

    async fn delete_attribute(&self, id: ObjectId, field: &str) -> OrbResult<()> {
        self.call_done(Message::DeleteAttribute {
            id,
            field: field.to_string(),
        })
        .await
    }

    async fn get_state(&self, id: ObjectId) -> OrbResult<Vec<u8>> {
        self.call_payload(Message::GetState { id }).await
    }

    async fn put_state(&self, id: ObjectId, state: Vec<u8>, mode: PutMode) -> OrbResult<()> {
        self.call_done(Message::PutState { id, state, mode }).await
    }

    async fn discard_state(&self, id: ObjectId) -> OrbResult<()> {
        self.call_done(Message::DiscardState { id }).await
    }

    async fn move_object(&self, id: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId> {
        self.call_backend(Message::MoveObject { id, target }).await
    }

    async fn new_replica(&self, id: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId> {
        self.call_backend(Message::NewReplica { id, target }).await
    }

    async fn move_all_objects(&self) -> OrbResult<usize> {
        self.call_count(Message::MoveAllObjects).await
    }

    async fn flush_all(&self) -> OrbResult<usize> {
        self.call_count(Message::FlushAll).await
    }
}

/// Serve one request frame against `api` and return the response frame.
///
/// Failures of the call itself are returned to the caller as
/// [`Message::Error`]; only an undecodable request or an unencodable
/// response is a protocol error.
pub async fn dispatch(api: &dyn BackendApi, frame: &[u8]) -> ProtocolResult<Vec<u8>> {
    let (request, _) = FrameCodec::decode(frame)?;
    debug!(backend = %api.backend_id(), request = request.type_name(), "dispatch");
    let outcome = match request {
        Message::MakePersistent(req) => api.make_persistent(req).await.map(Message::Identity),
        Message::Execute { id, method, args } => {
            api.execute(id, &method, args).await.map(Message::Payload)
        }
        Message::GetAttribute { id, field } => {
            api.get_attribute(id, &field).await.map(Message::Payload)
        }
        Message::SetAttribute { id, field, value } => api
            .set_attribute(id, &field, value)
            .await
            .map(|()| Message::Done),
        Message::DeleteAttribute { id, field } => api
            .delete_attribute(id, &field)
            .await
            .map(|()| Message::Done),
        Message::GetState { id } => api.get_state(id).await.map(Message::Payload),
        Message::PutState { id, state, mode } => {
            api.put_state(id, state, mode).await.map(|()| Message::Done)
        }
        Message::DiscardState { id } => api.discard_state(id).await.map(|()| Message::Done),
        Message::MoveObject { id, target } => {
            api.move_object(id, target).await.map(Message::Backend)
        }
        Message::NewReplica { id, target } => {
            api.new_replica(id, target).await.map(Message::Backend)
        }
        Message::FlushAll => api.flush_all().await.map(|n| Message::Count(n as u64)),
        Message::MoveAllObjects => api
            .move_all_objects()
            .await
            .map(|n| Message::Count(n as u64)),
        response => {
            warn!(message = response.type_name(), "response received as request");
            Err(OrbError::InvalidArgument(format!(
                "{} is not a request",
                response.type_name()
            )))
        }
    };
    FrameCodec::encode(&outcome.unwrap_or_else(Message::Error))
}

/// In-process [`FrameChannel`] that dispatches straight into a backend.
///
/// Every request still goes through the full encode/decode path. The
/// channel can be taken offline to simulate an unreachable backend.
pub struct LoopbackChannel {
    server: Arc<dyn BackendApi>,
    offline: AtomicBool,
}

impl LoopbackChannel {
    pub fn new(server: Arc<dyn BackendApi>) -> Self {
        Self {
            server,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameChannel for LoopbackChannel {
    async fn round_trip(&self, frame: Vec<u8>) -> ProtocolResult<Vec<u8>> {
        if self.is_offline() {
            return Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "backend offline",
            )));
        }
        dispatch(self.server.as_ref(), &frame).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use orb_types::Stage;

    /// Echo backend that records what it was asked.
    #[derive(Default)]
    struct EchoBackend {
        id: BackendId,
        calls: Mutex<Vec<&'static str>>,
    }

    impl EchoBackend {
        fn record(&self, name: &'static str) {
            self.calls.lock().unwrap().push(name);
        }
    }

    #[async_trait]
    impl BackendApi for EchoBackend {
        fn backend_id(&self) -> BackendId {
            self.id
        }
        async fn make_persistent(&self, request: MakePersistentRequest) -> OrbResult<ObjectId> {
            self.record("make_persistent");
            Ok(request.id)
        }
        async fn execute(&self, id: ObjectId, method: &str, args: Vec<u8>) -> OrbResult<Vec<u8>> {
            self.record("execute");
            if method == "fail" {
                return Err(OrbError::NotMaster { id, master: Some(self.id) });
            }
            Ok(args)
        }
        async fn get_attribute(&self, _id: ObjectId, field: &str) -> OrbResult<Vec<u8>> {
            Ok(field.as_bytes().to_vec())
        }
        async fn set_attribute(&self, _: ObjectId, _: &str, _: Vec<u8>) -> OrbResult<()> {
            self.record("set_attribute");
            Ok(())
        }
        async fn delete_attribute(&self, id: ObjectId, field: &str) -> OrbResult<()> {
            self.record("delete_attribute");
            if field == "missing" {
                return Err(OrbError::does_not_exist(format!("field {field} of {id}")));
            }
            Ok(())
        }
        async fn get_state(&self, _id: ObjectId) -> OrbResult<Vec<u8>> {
            Ok(vec![9])
        }
        async fn put_state(&self, _: ObjectId, _: Vec<u8>, _: PutMode) -> OrbResult<()> {
            self.record("put_state");
            Ok(())
        }
        async fn discard_state(&self, _id: ObjectId) -> OrbResult<()> {
            Ok(())
        }
        async fn move_object(&self, _: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId> {
            Ok(target.unwrap_or(self.id))
        }
        async fn new_replica(&self, _: ObjectId, target: Option<BackendId>) -> OrbResult<BackendId> {
            Ok(target.unwrap_or(self.id))
        }
        async fn move_all_objects(&self) -> OrbResult<usize> {
            self.record("move_all_objects");
            Ok(7)
        }
        async fn flush_all(&self) -> OrbResult<usize> {
            Ok(3)
        }
    }

    fn framed() -> (Arc<EchoBackend>, Arc<LoopbackChannel>, FramedBackend) {
        let server = Arc::new(EchoBackend::default());
        let channel = Arc::new(LoopbackChannel::new(server.clone()));
        let client = FramedBackend::new(server.id, channel.clone(), Duration::from_secs(1));
        (server, channel, client)
    }

    #[tokio::test]
    async fn calls_round_trip_through_frames() {
        let (server, _, client) = framed();
        let id = ObjectId::new();
        assert_eq!(client.execute(id, "echo", vec![1, 2]).await.unwrap(), vec![1, 2]);
        assert_eq!(client.get_attribute(id, "name").await.unwrap(), b"name".to_vec());
        client.set_attribute(id, "name", vec![]).await.unwrap();
        client.put_state(id, vec![], PutMode::Update).await.unwrap();
        assert_eq!(client.get_state(id).await.unwrap(), vec![9]);
        assert_eq!(client.flush_all().await.unwrap(), 3);
        let target = BackendId::new();
        assert_eq!(client.move_object(id, Some(target)).await.unwrap(), target);
        assert_eq!(
            *server.calls.lock().unwrap(),
            vec!["execute", "set_attribute", "put_state"]
        );
    }

    #[tokio::test]
    async fn attribute_removal_and_draining_round_trip() {
        let (server, _, client) = framed();
        let id = ObjectId::new();
        client.delete_attribute(id, "name").await.unwrap();
        let err = client.delete_attribute(id, "missing").await.unwrap_err();
        assert!(matches!(err, OrbError::DoesNotExist { .. }));
        assert_eq!(client.move_all_objects().await.unwrap(), 7);
        assert_eq!(
            *server.calls.lock().unwrap(),
            vec!["delete_attribute", "delete_attribute", "move_all_objects"]
        );
    }

    #[tokio::test]
    async fn remote_errors_are_returned_verbatim() {
        let (server, _, client) = framed();
        let id = ObjectId::new();
        let err = client.execute(id, "fail", vec![]).await.unwrap_err();
        assert_eq!(err, OrbError::NotMaster { id, master: Some(server.id) });
    }

    #[tokio::test]
    async fn offline_channel_is_unavailable() {
        let (_, channel, client) = framed();
        channel.set_offline(true);
        let err = client.flush_all().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.stage(), Some(Stage::Rpc));
        channel.set_offline(false);
        assert_eq!(client.flush_all().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn dispatch_rejects_responses_as_requests() {
        let server = EchoBackend::default();
        let frame = FrameCodec::encode(&Message::Done).unwrap();
        let reply = dispatch(&server, &frame).await.unwrap();
        let (msg, _) = FrameCodec::decode(&reply).unwrap();
        assert!(matches!(msg, Message::Error(OrbError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn slow_channel_times_out() {
        struct Stalled;
        #[async_trait]
        impl FrameChannel for Stalled {
            async fn round_trip(&self, _frame: Vec<u8>) -> ProtocolResult<Vec<u8>> {
                std::future::pending().await
            }
        }
        let client = FramedBackend::new(BackendId::new(), Arc::new(Stalled), Duration::from_millis(20));
        let err = client.get_state(ObjectId::new()).await.unwrap_err();
        assert!(matches!(err, OrbError::Unavailable { .. }));
    }
}
