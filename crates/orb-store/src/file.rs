use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use orb_types::ObjectId;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::state::StoredState;
use crate::traits::StateStore;

const TEMP_SUFFIX: &str = ".tmp";

/// One file per object under a root directory.
///
/// Files are named by the identity's hex form and hold a bincode
/// [`StoredState`]. Writes go to a temporary file that is fsynced and then
/// renamed over the target, so a crash never leaves a torn state.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &ObjectId) -> PathBuf {
        self.root.join(id.to_hex())
    }
}

impl StateStore for FileStateStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredState>> {
        let bytes = match fs::read(self.path_for(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                id: *id,
                reason: e.to_string(),
            })
    }

    fn write(&self, id: &ObjectId, state: &StoredState) -> StoreResult<()> {
        let bytes =
            bincode::serialize(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let target = self.path_for(id);
        let temp = self.root.join(format!("{}{TEMP_SUFFIX}", id.to_hex()));
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;
        debug!(%id, bytes = bytes.len(), "wrote object state");
        Ok(())
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.path_for(id).is_file())
    }

    fn ids(&self) -> StoreResult<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if let Ok(id) = ObjectId::from_hex(name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
