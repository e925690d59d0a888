use std::fmt;
use std::time::Duration;

use orb_types::{OrbError, Stage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("frame tag {header} does not match {payload} payload")]
    TagMismatch { header: u8, payload: &'static str },

    #[error("unexpected response: expected {expected}, got {found}")]
    UnexpectedResponse {
        expected: &'static str,
        found: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Convert into the runtime taxonomy. Everything except a local
    /// serialization failure is a transport problem and therefore retryable.
    pub fn into_orb(self, target: impl fmt::Display) -> OrbError {
        match self {
            Self::Serialization(reason) => OrbError::Serialization {
                what: "frame".into(),
                reason,
            },
            other => OrbError::unavailable(target, Stage::Rpc, other),
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
