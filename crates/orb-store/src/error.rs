use orb_types::{ObjectId, OrbError, Stage};

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Serialization or deserialization of a stored record failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored record is malformed.
    #[error("corrupt state for {id}: {reason}")]
    Corrupt { id: ObjectId, reason: String },
}

impl StoreError {
    /// Convert into the runtime taxonomy, recording where it happened.
    pub fn at(self, stage: Stage) -> OrbError {
        match self {
            Self::Corrupt { id, reason } => OrbError::Deserialization {
                what: format!("stored state of {id}"),
                reason,
            },
            other => OrbError::unavailable("state store", stage, other),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_unavailable() {
        let err = StoreError::Io(std::io::Error::other("disk gone")).at(Stage::Flush);
        assert!(err.is_retryable());
        assert_eq!(err.stage(), Some(Stage::Flush));
    }

    #[test]
    fn corruption_is_not_retryable() {
        let err = StoreError::Corrupt {
            id: ObjectId::new(),
            reason: "bad".into(),
        }
        .at(Stage::Load);
        assert!(matches!(err, OrbError::Deserialization { .. }));
        assert!(!err.is_retryable());
    }
}
