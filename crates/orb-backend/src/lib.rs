//! Backend runtime for the ORB system.
//!
//! A [`BackendRuntime`] holds the authoritative state of the objects it
//! masters and read copies of those it replicates. It serves the
//! [`BackendApi`](orb_protocol::BackendApi) surface: every operation takes
//! the object's lock, confirms ownership once the lock is held, and
//! materializes the object from the state store on a heap miss.
//!
//! Mastership changes only through [`BackendRuntime::relocate`], whose
//! commit point is a compare-and-swap in the directory.

pub mod config;
pub mod relocation;
pub mod runtime;
pub mod service;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BackendConfig;
pub use relocation::{MoveState, RelocationKind, RelocationReport};
pub use runtime::{BackendRuntime, Ownership, Role};
pub use sink::StoreSink;
