use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Globally unique identity of a persistent object.
///
/// Assigned once, when the object is made persistent, and never reused.
/// Identities are time-ordered (UUID v7) so directory listings sort roughly
/// by creation time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

/// Identity of a backend process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendId(Uuid);

macro_rules! uuid_identity {
    ($ty:ident, $label:literal) => {
        impl $ty {
            /// Generate a new time-ordered identity.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Create from the raw 16 bytes.
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The raw 16 bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Full hex encoding (32 characters, no hyphens).
            pub fn to_hex(&self) -> String {
                hex::encode(self.0.as_bytes())
            }

            /// Short identifier (first 8 hex characters).
            pub fn short_id(&self) -> String {
                hex::encode(&self.0.as_bytes()[..4])
            }

            /// Parse from 32 hex characters.
            pub fn from_hex(s: &str) -> Result<Self, TypeError> {
                let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
                let arr: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                    TypeError::InvalidLength {
                        expected: 16,
                        actual: bytes.len(),
                    }
                })?;
                Ok(Self::from_bytes(arr))
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.short_id())
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = TypeError;

            /// Accepts both the hyphenated UUID form and bare hex.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| TypeError::InvalidHex(e.to_string()))
            }
        }
    };
}

uuid_identity!(ObjectId, "ObjectId");
uuid_identity!(BackendId, "BackendId");
