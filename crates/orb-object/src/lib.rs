//! In-memory object model for the ORB runtime.
//!
//! Application objects are explicit cells holding a map of named fields.
//! A cell starts *volatile* (no persistent identity); making it persistent
//! assigns an [`ObjectId`](orb_types::ObjectId) exactly once. Classes are
//! described by a [`ClassDescriptor`] registered in a [`ClassRegistry`];
//! behaviour is attached as named read or write methods, optionally
//! contributed by composed [`Capability`] sets.
//!
//! # Key Types
//!
//! - [`Value`]: field and argument values; `Value::Object` compares by instance
//! - [`ObjectCell`] / [`ObjectRef`]: a shared, mutable object instance
//! - [`ClassDescriptor`] / [`Method`] / [`Capability`]: class behaviour
//! - [`ClassRegistry`]: name → descriptor lookup

pub mod cell;
pub mod class;
pub mod value;

pub use cell::{Fields, InstanceId, ObjectCell, ObjectRef};
pub use class::{Capability, ClassDescriptor, ClassRegistry, Method, ReadFn, WriteFn};
pub use value::Value;
