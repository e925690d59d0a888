//! Backend RPC surface for the ORB runtime.
//!
//! [`BackendApi`] is the seam between clients, peer backends and a backend
//! runtime. It can be called directly in-process, or through frames:
//!
//! ```text
//! [4 bytes length BE][1 byte message tag][bincode payload]
//! ```
//!
//! [`FramedBackend`] turns `BackendApi` calls into frames over any
//! [`FrameChannel`]; [`dispatch`] turns a request frame back into a call on
//! a local `BackendApi` and frames the response. [`BackendPool`] maps
//! backend identities to reachable endpoints.

pub mod api;
pub mod codec;
pub mod error;
pub mod framed;
pub mod message;
pub mod pool;
pub mod transport;

pub use api::{BackendApi, MakePersistentRequest, PutMode};
pub use codec::FrameCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use framed::{dispatch, FrameChannel, FramedBackend, LoopbackChannel};
pub use message::{Message, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
pub use pool::BackendPool;
pub use transport::{read_frame, serve_stream, write_frame, StreamChannel};
