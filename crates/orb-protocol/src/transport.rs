//! Frames over byte streams.
//!
//! [`serve_stream`] answers request frames arriving on a connection;
//! [`StreamChannel`] is the matching client side. Any tokio
//! `AsyncRead + AsyncWrite` works: a `TcpStream`, a Unix socket or an
//! in-memory duplex pipe.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::BackendApi;
use crate::codec::FrameCodec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::framed::{dispatch, FrameChannel};

/// Read one whole frame (prefix included). Returns `None` on a clean end
/// of stream before the first byte of a frame.
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = FrameCodec::frame_len(prefix)?;
    let mut frame = vec![0u8; 4 + len];
    frame[..4].copy_from_slice(&prefix);
    reader.read_exact(&mut frame[4..]).await?;
    Ok(Some(frame))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Answer request frames on `stream` until the peer closes it.
pub async fn serve_stream<S>(api: Arc<dyn BackendApi>, mut stream: S) -> ProtocolResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut served = 0usize;
    while let Some(frame) = read_frame(&mut stream).await? {
        let reply = match dispatch(api.as_ref(), &frame).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(backend = %api.backend_id(), error = %e, "dropping connection");
                return Err(e);
            }
        };
        write_frame(&mut stream, &reply).await?;
        served += 1;
    }
    debug!(backend = %api.backend_id(), served, "connection closed");
    Ok(())
}

/// Client side of a framed stream. One request is in flight at a time.
pub struct StreamChannel<S> {
    stream: Mutex<S>,
}

impl<S> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl<S> FrameChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn round_trip(&self, frame: Vec<u8>) -> ProtocolResult<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &frame).await?;
        read_frame(&mut *stream).await?.ok_or_else(|| {
            ProtocolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            ))
        })
    }
}
