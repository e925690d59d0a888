//! Key layout of the directory's key-value namespace.
//!
//! - `/object/{id}` → [`ObjectMetadata`](orb_types::ObjectMetadata)
//! - `/alias/{dataset}/{alias}` → [`ObjectId`]
//! - `/backend/{id}` → [`BackendInfo`](orb_types::BackendInfo)

use orb_types::{BackendId, ObjectId};

pub const OBJECT_PREFIX: &str = "/object/";
pub const ALIAS_PREFIX: &str = "/alias/";
pub const BACKEND_PREFIX: &str = "/backend/";

pub fn object_key(id: &ObjectId) -> String {
    format!("{OBJECT_PREFIX}{id}")
}

pub fn alias_key(dataset: &str, alias: &str) -> String {
    format!("{ALIAS_PREFIX}{dataset}/{alias}")
}

pub fn alias_prefix(dataset: &str) -> String {
    format!("{ALIAS_PREFIX}{dataset}/")
}

pub fn backend_key(id: &BackendId) -> String {
    format!("{BACKEND_PREFIX}{id}")
}
