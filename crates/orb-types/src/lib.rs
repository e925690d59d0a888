//! Foundation types for the ORB persistent-object runtime.
//!
//! Every other ORB crate depends on `orb-types`. It holds the identifiers
//! that name objects and backends, the directory record describing where an
//! object lives, and the error taxonomy shared across process boundaries.
//!
//! # Key Types
//!
//! - [`ObjectId`]: 128-bit persistent object identity (UUID v7)
//! - [`BackendId`]: 128-bit identity of a backend process
//! - [`ObjectMetadata`]: directory record: master, replicas, alias, dataset
//! - [`BackendInfo`]: directory record advertising a backend
//! - [`LockMode`]: shared or exclusive access to one object
//! - [`OrbError`] / [`Stage`]: error taxonomy with the originating stage

pub mod access;
pub mod error;
pub mod id;
pub mod metadata;

pub use access::LockMode;
pub use error::{OrbError, OrbResult, Stage, TypeError};
pub use id::{BackendId, ObjectId};
pub use metadata::{BackendInfo, ObjectMetadata};
