//! Object graph codec for the ORB runtime.
//!
//! Converts an object and everything reachable from it into an
//! [`Envelope`] and back, preserving reference identity. Each reachable
//! object is classified as one of:
//!
//! - **immutable**: primitives and containers, inlined by value;
//! - **volatile**: objects without a persistent identity, flattened by
//!   value exactly once per instance, later encounters becoming
//!   back-references to a traversal-scoped tag;
//! - **persistent**: objects with an [`ObjectId`](orb_types::ObjectId),
//!   encoded as `(identity, class, location hint)` and resolved lazily on
//!   the receiving side through a [`ProxyResolver`].
//!
//! # Wire layout
//!
//! ```text
//! "ORBG" | version u8 | varint entry count | entries... | BLAKE3 (32 bytes)
//! ```
//!
//! Entry 0 is always the root. See [`envelope`] for per-entry encoding.

pub mod decoder;
pub mod encoder;
pub mod envelope;
pub mod error;
pub mod proxy;
mod wire;

pub use decoder::GraphDecoder;
pub use encoder::GraphEncoder;
pub use envelope::{Entry, Envelope, Slot, ENVELOPE_VERSION, MAGIC};
pub use error::{CodecError, CodecResult};
pub use proxy::{ProxyCache, ProxyResolver};
