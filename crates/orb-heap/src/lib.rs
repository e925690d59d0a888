//! Process-local object heap for the ORB runtime.
//!
//! The [`HeapManager`] caches materialized object instances by identity,
//! tracks which of them differ from their backend-of-record (dirty), and
//! evicts idle entries from a background sweep. Dirty state is written out
//! through a [`FlushSink`] before an entry leaves the heap; a failed flush
//! keeps the entry for the next sweep.
//!
//! Operations pin the identities they touch with [`HeapManager::pin`];
//! pinned entries are never evicted.

pub mod config;
pub mod heap;
pub mod sink;
pub mod sweeper;

pub use config::HeapConfig;
pub use heap::{HeapManager, PinGuard, SweepReport};
pub use sink::FlushSink;
pub use sweeper::SweeperHandle;
