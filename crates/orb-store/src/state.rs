use serde::{Deserialize, Serialize};

/// Last flushed state of one object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    pub class_name: String,
    /// Encoded object state envelope.
    pub envelope: Vec<u8>,
}

impl StoredState {
    pub fn new(class_name: impl Into<String>, envelope: Vec<u8>) -> Self {
        Self {
            class_name: class_name.into(),
            envelope,
        }
    }

    pub fn size(&self) -> usize {
        self.envelope.len()
    }
}
