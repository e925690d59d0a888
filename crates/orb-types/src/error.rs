use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::LockMode;
use crate::id::{BackendId, ObjectId};

/// Errors produced by identifier parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// The step of an operation at which a failure originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Lock,
    Load,
    Encode,
    Decode,
    Execute,
    Flush,
    Transfer,
    Commit,
    Directory,
    Rpc,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lock => "lock",
            Self::Load => "load",
            Self::Encode => "encode",
            Self::Decode => "decode",
            Self::Execute => "execute",
            Self::Flush => "flush",
            Self::Transfer => "transfer",
            Self::Commit => "commit",
            Self::Directory => "directory",
            Self::Rpc => "rpc",
        };
        f.write_str(name)
    }
}

/// Error taxonomy shared by every runtime component.
///
/// Errors are serializable so a backend can return them to a client intact.
/// Each variant names the offending identity or alias, and the stage where
/// that matters to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbError {
    /// Identity or alias collision on create-if-absent.
    #[error("{what} already exists")]
    AlreadyExists { what: String },

    /// Unknown identity, alias, class, method or attribute.
    #[error("{what} does not exist")]
    DoesNotExist { what: String },

    /// A compare-and-swap lost against a concurrent update.
    #[error("concurrent modification of {id} at {stage}")]
    ConcurrentModification { id: ObjectId, stage: Stage },

    #[error("timed out waiting for {mode} lock on {id} at {stage}")]
    LockTimeout {
        id: ObjectId,
        mode: LockMode,
        stage: Stage,
    },

    /// A backend, store or directory could not be reached in time.
    #[error("{target} unavailable at {stage}: {reason}")]
    Unavailable {
        target: String,
        stage: Stage,
        reason: String,
    },

    #[error("cannot serialize {what}: {reason}")]
    Serialization { what: String, reason: String },

    #[error("cannot deserialize {what}: {reason}")]
    Deserialization { what: String, reason: String },

    /// The contacted backend is not the master of `id`. `master` carries
    /// the current master when the backend knows it.
    #[error("backend is not master of {id} (master: {master:?})")]
    NotMaster {
        id: ObjectId,
        master: Option<BackendId>,
    },

    #[error("object {id} is read-only")]
    ReadOnly { id: ObjectId },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A user method returned an error. The object is left unchanged.
    #[error("method {method} on {id} failed: {message}")]
    MethodFailed {
        id: ObjectId,
        method: String,
        message: String,
    },

    #[error("runtime is shutting down")]
    Shutdown,
}

impl OrbError {
    pub fn already_exists(what: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            what: what.to_string(),
        }
    }

    pub fn does_not_exist(what: impl fmt::Display) -> Self {
        Self::DoesNotExist {
            what: what.to_string(),
        }
    }

    pub fn unavailable(target: impl fmt::Display, stage: Stage, reason: impl fmt::Display) -> Self {
        Self::Unavailable {
            target: target.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }

    /// Lock and network timeouts may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Unavailable { .. })
    }

    /// The caller's location hint is stale and must be refreshed.
    pub fn needs_reresolve(&self) -> bool {
        matches!(self, Self::NotMaster { .. })
    }

    /// The stage recorded on the error, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ConcurrentModification { stage, .. }
            | Self::LockTimeout { stage, .. }
            | Self::Unavailable { stage, .. } => Some(*stage),
            Self::Serialization { .. } => Some(Stage::Encode),
            Self::Deserialization { .. } => Some(Stage::Decode),
            Self::MethodFailed { .. } => Some(Stage::Execute),
            _ => None,
        }
    }
}

/// Result alias used across the runtime.
pub type OrbResult<T> = Result<T, OrbError>;
