//! Per-object concurrency control for the ORB runtime.
//!
//! [`LockManager`] owns one reader/writer lock per live object identity.
//! Locks are created on first demand and reclaimed once nobody holds or
//! waits on them *and* the identity is no longer heap-resident. The two
//! conditions are tracked independently: heap residency is a flag set by
//! the heap manager, lock use is a count of holders and waiters.
//!
//! Guards are RAII: dropping a guard (or cancelling a pending acquisition)
//! releases everything it took.

mod manager;

pub use manager::{LockManager, ObjectLockGuard};
