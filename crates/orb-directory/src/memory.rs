//! In-memory directory for tests and single-process deployments.
//!
//! [`InMemoryDirectory`] keeps a key-value namespace of JSON records (see
//! [`keys`](crate::keys)) behind one `RwLock`. Every trait method takes the
//! lock once, which makes create-if-absent and compare-and-swap atomic.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use orb_types::{BackendId, BackendInfo, ObjectId, ObjectMetadata, OrbError, OrbResult, Stage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::keys::{alias_key, alias_prefix, backend_key, object_key, BACKEND_PREFIX, OBJECT_PREFIX};
use crate::names::{validate_alias, validate_dataset};
use crate::traits::Directory;

type Namespace = BTreeMap<String, String>;

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> OrbResult<T> {
    serde_json::from_str(raw).map_err(|e| OrbError::Deserialization {
        what: format!("directory record {key}"),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(key: &str, value: &T) -> OrbResult<String> {
    serde_json::to_string(value).map_err(|e| OrbError::Serialization {
        what: format!("directory record {key}"),
        reason: e.to_string(),
    })
}

fn read<T: DeserializeOwned>(ns: &Namespace, key: &str) -> OrbResult<Option<T>> {
    ns.get(key).map(|raw| decode(key, raw)).transpose()
}

fn write<T: Serialize>(ns: &mut Namespace, key: String, value: &T) -> OrbResult<()> {
    let raw = encode(&key, value)?;
    ns.insert(key, raw);
    Ok(())
}

/// An in-memory implementation of [`Directory`].
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    records: RwLock<Namespace>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered objects.
    pub fn object_count(&self) -> usize {
        self.records
            .read()
            .expect("lock poisoned")
            .keys()
            .filter(|k| k.starts_with(OBJECT_PREFIX))
            .count()
    }

    fn metadata(ns: &Namespace, id: &ObjectId) -> OrbResult<ObjectMetadata> {
        read(ns, &object_key(id))?.ok_or_else(|| OrbError::does_not_exist(format!("object {id}")))
    }

    fn lock_poisoned() -> OrbError {
        OrbError::unavailable("directory", Stage::Directory, "lock poisoned")
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn register_if_absent(&self, metadata: ObjectMetadata) -> OrbResult<bool> {
        validate_dataset(&metadata.dataset)?;
        let key = object_key(&metadata.id);
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        if ns.contains_key(&key) {
            return Ok(false);
        }
        write(&mut ns, key, &metadata)?;
        debug!(id = %metadata.id, master = %metadata.master_backend_id, "registered object");
        Ok(true)
    }

    async fn get(&self, id: &ObjectId) -> OrbResult<ObjectMetadata> {
        let ns = self.records.read().map_err(|_| Self::lock_poisoned())?;
        Self::metadata(&ns, id)
    }

    async fn compare_and_swap_master(
        &self,
        id: &ObjectId,
        expected: BackendId,
        new_master: BackendId,
    ) -> OrbResult<bool> {
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        let mut metadata = Self::metadata(&ns, id)?;
        if metadata.master_backend_id != expected {
            return Ok(false);
        }
        metadata.set_master(new_master);
        write(&mut ns, object_key(id), &metadata)?;
        debug!(%id, from = %expected, to = %new_master, "swapped master");
        Ok(true)
    }

    async fn add_replica_if_absent(&self, id: &ObjectId, backend: BackendId) -> OrbResult<bool> {
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        let mut metadata = Self::metadata(&ns, id)?;
        if !metadata.add_replica(backend) {
            return Ok(false);
        }
        write(&mut ns, object_key(id), &metadata)?;
        debug!(%id, %backend, "added replica");
        Ok(true)
    }

    async fn register_alias_if_absent(
        &self,
        dataset: &str,
        alias: &str,
        id: &ObjectId,
    ) -> OrbResult<bool> {
        validate_dataset(dataset)?;
        validate_alias(alias)?;
        let key = alias_key(dataset, alias);
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        if ns.contains_key(&key) {
            return Ok(false);
        }
        write(&mut ns, key, id)?;

        // Reflect the alias on an already registered object of the dataset.
        if let Some(mut metadata) = read::<ObjectMetadata>(&ns, &object_key(id))? {
            if metadata.dataset == dataset && metadata.alias.is_none() {
                metadata.alias = Some(alias.to_string());
                write(&mut ns, object_key(id), &metadata)?;
            }
        }
        debug!(%id, dataset, alias, "registered alias");
        Ok(true)
    }

    async fn resolve_alias(&self, dataset: &str, alias: &str) -> OrbResult<ObjectId> {
        let key = alias_key(dataset, alias);
        let ns = self.records.read().map_err(|_| Self::lock_poisoned())?;
        read(&ns, &key)?.ok_or_else(|| OrbError::does_not_exist(format!("alias {dataset}/{alias}")))
    }

    async fn delete_alias(&self, dataset: &str, alias: &str) -> OrbResult<()> {
        let key = alias_key(dataset, alias);
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        let id: ObjectId = read(&ns, &key)?
            .ok_or_else(|| OrbError::does_not_exist(format!("alias {dataset}/{alias}")))?;
        ns.remove(&key);

        if let Some(mut metadata) = read::<ObjectMetadata>(&ns, &object_key(&id))? {
            if metadata.dataset == dataset && metadata.alias.as_deref() == Some(alias) {
                metadata.alias = None;
                write(&mut ns, object_key(&id), &metadata)?;
            }
        }
        debug!(%id, dataset, alias, "deleted alias");
        Ok(())
    }

    async fn list_aliases(&self, dataset: &str) -> OrbResult<Vec<(String, ObjectId)>> {
        let prefix = alias_prefix(dataset);
        let ns = self.records.read().map_err(|_| Self::lock_poisoned())?;
        ns.range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, raw)| Ok((key[prefix.len()..].to_string(), decode(key, raw)?)))
            .collect()
    }

    async fn delete_object(&self, id: &ObjectId) -> OrbResult<()> {
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        let metadata = Self::metadata(&ns, id)?;
        ns.remove(&object_key(id));
        if let Some(alias) = &metadata.alias {
            let key = alias_key(&metadata.dataset, alias);
            if read::<ObjectId>(&ns, &key)?.as_ref() == Some(id) {
                ns.remove(&key);
            }
        }
        debug!(%id, "deleted object");
        Ok(())
    }

    async fn register_backend(&self, info: BackendInfo) -> OrbResult<()> {
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        write(&mut ns, backend_key(&info.id), &info)
    }

    async fn unregister_backend(&self, id: &BackendId) -> OrbResult<bool> {
        let mut ns = self.records.write().map_err(|_| Self::lock_poisoned())?;
        Ok(ns.remove(&backend_key(id)).is_some())
    }

    async fn objects(&self) -> OrbResult<Vec<ObjectMetadata>> {
        let ns = self.records.read().map_err(|_| Self::lock_poisoned())?;
        let mut all = ns
            .range(OBJECT_PREFIX.to_string()..)
            .take_while(|(key, _)| key.starts_with(OBJECT_PREFIX))
            .map(|(key, raw)| decode::<ObjectMetadata>(key, raw))
            .collect::<OrbResult<Vec<_>>>()?;
        all.sort_by_key(|metadata| metadata.id);
        Ok(all)
    }

    async fn backends(&self) -> OrbResult<Vec<BackendInfo>> {
        let ns = self.records.read().map_err(|_| Self::lock_poisoned())?;
        let mut infos = ns
            .range(BACKEND_PREFIX.to_string()..)
            .take_while(|(key, _)| key.starts_with(BACKEND_PREFIX))
            .map(|(key, raw)| decode::<BackendInfo>(key, raw))
            .collect::<OrbResult<Vec<_>>>()?;
        infos.sort_by_key(|info| info.id);
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn metadata(master: BackendId) -> ObjectMetadata {
        ObjectMetadata::new(ObjectId::new(), "Person", "people", master)
    }

    // ---------------------------------------------------------------
    // Object registration
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn register_is_create_if_absent() {
        let dir = InMemoryDirectory::new();
        let md = metadata(BackendId::new());
        assert!(dir.register_if_absent(md.clone()).await.unwrap());
        assert!(!dir.register_if_absent(md.clone()).await.unwrap());
        assert_eq!(dir.get(&md.id).await.unwrap(), md);
        assert_eq!(dir.object_count(), 1);
    }

    #[tokio::test]
    async fn objects_lists_only_object_records() {
        let dir = InMemoryDirectory::new();
        let a = metadata(BackendId::new());
        let b = metadata(BackendId::new());
        dir.register_if_absent(a.clone()).await.unwrap();
        dir.register_if_absent(b.clone()).await.unwrap();
        dir.register_alias_if_absent("people", "dana", &a.id).await.unwrap();
        dir.register_backend(BackendInfo::new(BackendId::new(), "c", "mem://c"))
            .await
            .unwrap();

        let listed = dir.objects().await.unwrap();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(listed.iter().map(|m| m.id).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn unknown_object_does_not_exist() {
        let dir = InMemoryDirectory::new();
        let id = ObjectId::new();
        assert!(matches!(
            dir.get(&id).await,
            Err(OrbError::DoesNotExist { .. })
        ));
        assert!(dir.try_get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_rejects_bad_dataset() {
        let dir = InMemoryDirectory::new();
        let mut md = metadata(BackendId::new());
        md.dataset = "a/b".into();
        assert!(matches!(
            dir.register_if_absent(md).await,
            Err(OrbError::InvalidArgument(_))
        ));
    }

    // ---------------------------------------------------------------
    // Master CAS and replicas
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn cas_master_requires_expected() {
        let dir = InMemoryDirectory::new();
        let a = BackendId::new();
        let b = BackendId::new();
        let md = metadata(a);
        dir.register_if_absent(md.clone()).await.unwrap();

        assert!(!dir.compare_and_swap_master(&md.id, b, b).await.unwrap());
        assert_eq!(dir.master_of(&md.id).await.unwrap(), a);

        assert!(dir.compare_and_swap_master(&md.id, a, b).await.unwrap());
        assert_eq!(dir.master_of(&md.id).await.unwrap(), b);

        // The old master is now stale.
        assert!(!dir.compare_and_swap_master(&md.id, a, a).await.unwrap());
    }

    #[tokio::test]
    async fn cas_master_promotes_replica_out_of_set() {
        let dir = InMemoryDirectory::new();
        let a = BackendId::new();
        let r = BackendId::new();
        let md = metadata(a);
        dir.register_if_absent(md.clone()).await.unwrap();
        dir.add_replica_if_absent(&md.id, r).await.unwrap();
        dir.compare_and_swap_master(&md.id, a, r).await.unwrap();
        let after = dir.get(&md.id).await.unwrap();
        assert!(after.is_master(&r));
        assert!(!after.is_replica(&r));
    }

    #[tokio::test]
    async fn racing_cas_has_one_winner() {
        let dir = Arc::new(InMemoryDirectory::new());
        let source = BackendId::new();
        let md = metadata(source);
        dir.register_if_absent(md.clone()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dir = dir.clone();
            let id = md.id;
            handles.push(tokio::spawn(async move {
                dir.compare_and_swap_master(&id, source, BackendId::new())
                    .await
                    .unwrap()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn replicas_exclude_master_and_duplicates() {
        let dir = InMemoryDirectory::new();
        let a = BackendId::new();
        let r = BackendId::new();
        let md = metadata(a);
        dir.register_if_absent(md.clone()).await.unwrap();
        assert!(!dir.add_replica_if_absent(&md.id, a).await.unwrap());
        assert!(dir.add_replica_if_absent(&md.id, r).await.unwrap());
        assert!(!dir.add_replica_if_absent(&md.id, r).await.unwrap());
        assert!(dir.get(&md.id).await.unwrap().is_replica(&r));
    }

    // ---------------------------------------------------------------
    // Aliases
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn alias_is_create_if_absent() {
        let dir = InMemoryDirectory::new();
        let first = ObjectId::new();
        let second = ObjectId::new();
        assert!(dir.register_alias_if_absent("people", "alice", &first).await.unwrap());
        assert!(!dir.register_alias_if_absent("people", "alice", &second).await.unwrap());
        assert_eq!(dir.resolve_alias("people", "alice").await.unwrap(), first);
        // Same alias in another dataset is independent.
        assert!(dir.register_alias_if_absent("pets", "alice", &second).await.unwrap());
    }

    #[tokio::test]
    async fn racing_alias_registration_has_one_winner() {
        let dir = Arc::new(InMemoryDirectory::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let dir = dir.clone();
            handles.push(tokio::spawn(async move {
                dir.register_alias_if_absent("people", "bob", &ObjectId::new())
                    .await
                    .unwrap()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn alias_updates_registered_metadata() {
        let dir = InMemoryDirectory::new();
        let md = metadata(BackendId::new());
        dir.register_if_absent(md.clone()).await.unwrap();
        dir.register_alias_if_absent("people", "carol", &md.id).await.unwrap();
        assert_eq!(dir.get(&md.id).await.unwrap().alias.as_deref(), Some("carol"));

        dir.delete_alias("people", "carol").await.unwrap();
        assert!(dir.get(&md.id).await.unwrap().alias.is_none());
        assert!(matches!(
            dir.resolve_alias("people", "carol").await,
            Err(OrbError::DoesNotExist { .. })
        ));
        assert!(matches!(
            dir.delete_alias("people", "carol").await,
            Err(OrbError::DoesNotExist { .. })
        ));
    }

    #[tokio::test]
    async fn list_aliases_is_scoped_to_dataset() {
        let dir = InMemoryDirectory::new();
        let a = ObjectId::new();
        let b = ObjectId::new();
        dir.register_alias_if_absent("people", "zed", &a).await.unwrap();
        dir.register_alias_if_absent("people", "amy", &b).await.unwrap();
        dir.register_alias_if_absent("people2", "other", &b).await.unwrap();
        let listed = dir.list_aliases("people").await.unwrap();
        assert_eq!(listed, vec![("amy".to_string(), b), ("zed".to_string(), a)]);
    }

    #[tokio::test]
    async fn delete_object_drops_its_alias() {
        let dir = InMemoryDirectory::new();
        let md = metadata(BackendId::new()).with_alias("dave");
        dir.register_alias_if_absent("people", "dave", &md.id).await.unwrap();
        dir.register_if_absent(md.clone()).await.unwrap();
        dir.delete_object(&md.id).await.unwrap();
        assert!(dir.try_get(&md.id).await.unwrap().is_none());
        assert!(dir.resolve_alias("people", "dave").await.is_err());
    }

    // ---------------------------------------------------------------
    // Backends
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn backend_registry() {
        let dir = InMemoryDirectory::new();
        let a = BackendInfo::new(BackendId::new(), "a", "mem://a");
        let b = BackendInfo::new(BackendId::new(), "b", "mem://b");
        dir.register_backend(a.clone()).await.unwrap();
        dir.register_backend(b.clone()).await.unwrap();
        assert_eq!(dir.backends().await.unwrap(), vec![a.clone(), b.clone()]);
        assert!(dir.unregister_backend(&a.id).await.unwrap());
        assert_eq!(dir.backends().await.unwrap(), vec![b]);
        // Backends never show up as objects.
        assert_eq!(dir.object_count(), 0);
    }
}
