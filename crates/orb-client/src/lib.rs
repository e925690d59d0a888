//! Client runtime for the ORB system.
//!
//! A [`ClientRuntime`] makes objects persistent on a backend and hands out
//! [`ObjectHandle`]s that stay addressable by identity while the object
//! moves between backends. Calls are routed to the master named by the
//! directory; a stale location answers `NotMaster` and the [`Router`]
//! re-resolves and retries, backing off on lock and availability failures.
//!
//! Materialized state is cached in a local heap with the same eviction
//! rules as a backend. Local modifications are pushed back through a
//! [`RemoteSink`].

pub mod config;
pub mod handle;
pub mod placement;
pub mod router;
pub mod runtime;
pub mod sink;

pub use config::{ClientConfig, RetryPolicy};
pub use handle::{ObjectHandle, ProxyType};
pub use placement::{PlacementReport, Reach};
pub use router::{Router, RpcFuture};
pub use runtime::{ClientRuntime, PersistOptions};
pub use sink::RemoteSink;
