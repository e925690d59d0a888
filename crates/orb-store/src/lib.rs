//! Durable object state storage for ORB backends.
//!
//! A backend keeps the last flushed state of every object it holds in a
//! [`StateStore`], keyed by [`ObjectId`](orb_types::ObjectId). The store
//! never interprets the envelope bytes it holds.
//!
//! # Backends
//!
//! - [`InMemoryStateStore`]: `HashMap` behind a `RwLock`, for tests and
//!   embedding.
//! - [`FileStateStore`]: one file per object under a root directory,
//!   written atomically via rename.

pub mod error;
pub mod file;
pub mod memory;
pub mod state;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
pub use state::StoredState;
pub use traits::StateStore;
