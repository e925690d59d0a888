//! Object directory for the ORB runtime.
//!
//! The directory is the only resource shared between processes for
//! coordination. It maps each object identity to its [`ObjectMetadata`]
//! (master, replicas, alias, dataset, read-only flag), binds aliases to
//! identities within a dataset, and advertises the live backends.
//!
//! All cross-process coordination goes through its atomic primitives:
//! create-if-absent for identities and aliases, and compare-and-swap for
//! the master location.
//!
//! [`ObjectMetadata`]: orb_types::ObjectMetadata

pub mod keys;
pub mod memory;
pub mod names;
pub mod traits;

pub use memory::InMemoryDirectory;
pub use names::{validate_alias, validate_dataset};
pub use traits::Directory;
