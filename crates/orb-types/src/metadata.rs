use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::{BackendId, ObjectId};

/// Directory record for one persistent object.
///
/// Owned by the directory and only changed through its atomic operations.
/// The replica set never contains the master.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub id: ObjectId,
    pub class_name: String,
    pub dataset: String,
    pub alias: Option<String>,
    pub master_backend_id: BackendId,
    pub replica_backend_ids: BTreeSet<BackendId>,
    pub is_read_only: bool,
}

impl ObjectMetadata {
    pub fn new(
        id: ObjectId,
        class_name: impl Into<String>,
        dataset: impl Into<String>,
        master: BackendId,
    ) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            dataset: dataset.into(),
            alias: None,
            master_backend_id: master,
            replica_backend_ids: BTreeSet::new(),
            is_read_only: false,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.is_read_only = read_only;
        self
    }

    pub fn is_master(&self, backend: &BackendId) -> bool {
        &self.master_backend_id == backend
    }

    pub fn is_replica(&self, backend: &BackendId) -> bool {
        self.replica_backend_ids.contains(backend)
    }

    /// Whether `backend` holds any copy (master or replica).
    pub fn holds_copy(&self, backend: &BackendId) -> bool {
        self.is_master(backend) || self.is_replica(backend)
    }

    /// Make `backend` the master, dropping it from the replica set.
    pub fn set_master(&mut self, backend: BackendId) {
        self.replica_backend_ids.remove(&backend);
        self.master_backend_id = backend;
    }

    /// Add a replica. Returns `false` if it already holds a copy.
    pub fn add_replica(&mut self, backend: BackendId) -> bool {
        if self.is_master(&backend) {
            return false;
        }
        self.replica_backend_ids.insert(backend)
    }
}

/// Directory record advertising a backend process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub id: BackendId,
    pub name: String,
    pub address: String,
}

impl BackendInfo {
    pub fn new(id: BackendId, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
        }
    }
}
