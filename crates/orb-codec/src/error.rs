use orb_types::OrbError;
use thiserror::Error;

/// Errors from encoding or decoding object graphs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A volatile object's class is not in the registry.
    #[error("class {0} is not registered")]
    UnregisteredClass(String),

    #[error("payload encoding failed: {0}")]
    Encode(String),

    #[error("bad envelope magic")]
    BadMagic,

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("envelope checksum mismatch")]
    ChecksumMismatch,

    #[error("envelope truncated at offset {0}")]
    Truncated(usize),

    #[error("unknown reference kind {0}")]
    UnknownKind(u8),

    #[error("dangling back-reference to tag {0}")]
    DanglingBackReference(u32),

    #[error("tag {0} defined twice")]
    DuplicateTag(u32),

    #[error("entry index {0} out of range")]
    EntryOutOfRange(u32),

    #[error("entry {0} referenced more than once")]
    EntryReused(u32),

    #[error("unknown class {0}")]
    UnknownClass(String),

    #[error("root is {found}, expected {expected}")]
    RootMismatch { expected: String, found: String },

    #[error("payload nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("payload decoding failed: {0}")]
    Payload(String),
}

impl CodecError {
    /// Whether the failure happened while encoding.
    pub fn is_encode(&self) -> bool {
        matches!(self, Self::UnregisteredClass(_) | Self::Encode(_))
    }
}

impl From<CodecError> for OrbError {
    fn from(err: CodecError) -> Self {
        match &err {
            CodecError::UnregisteredClass(class) => OrbError::Serialization {
                what: format!("object of class {class}"),
                reason: err.to_string(),
            },
            CodecError::Encode(_) => OrbError::Serialization {
                what: "object graph".into(),
                reason: err.to_string(),
            },
            _ => OrbError::Deserialization {
                what: "envelope".into(),
                reason: err.to_string(),
            },
        }
    }
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
