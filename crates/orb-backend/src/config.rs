use std::time::Duration;

use orb_heap::HeapConfig;
use orb_types::{BackendId, OrbError, OrbResult};
use serde::{Deserialize, Serialize};

/// Backend runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Fixed identity. A fresh one is generated when absent.
    pub id: Option<BackendId>,
    pub name: String,
    /// Advertised in the directory so peers and clients can connect.
    pub address: String,
    /// How long an operation waits for an object lock.
    pub lock_timeout_ms: u64,
    /// How long a move or replication waits for the target to store state.
    pub transfer_timeout_ms: u64,
    pub heap: HeapConfig,
    /// Run the heap eviction sweep in the background.
    pub run_sweeper: bool,
}

impl BackendConfig {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            address: format!("mem://{name}"),
            name,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> OrbResult<Self> {
        toml::from_str(s).map_err(|e| OrbError::InvalidArgument(format!("backend config: {e}")))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: "backend".into(),
            address: "mem://backend".into(),
            lock_timeout_ms: 5_000,
            transfer_timeout_ms: 10_000,
            heap: HeapConfig::default(),
            run_sweeper: true,
        }
    }
}
