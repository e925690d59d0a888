//! Relocating the persistent objects reachable from a handle.
//!
//! A graph operation walks the persistent references in each object's
//! master state, breadth first from the root, and relocates every object
//! it selects one at a time through the object's master. Each single move
//! or replica is atomic; the graph as a whole is not.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use orb_codec::Envelope;
use orb_protocol::BackendApi;
use orb_types::{BackendId, ObjectId, ObjectMetadata, OrbResult};
use tracing::{debug, info, warn};

use crate::handle::ObjectHandle;
use crate::router::RpcFuture;
use crate::runtime::ClientRuntime;

/// Which persistent objects reachable from the root take part.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reach {
    /// The root alone.
    #[default]
    Object,
    /// The root and the reachable objects sharing its master. The walk
    /// does not continue through objects mastered elsewhere.
    Colocated,
    /// Every reachable object.
    All,
}

/// Outcome of a graph relocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlacementReport {
    /// Objects relocated, with the backend that received them.
    pub placed: Vec<(ObjectId, BackendId)>,
    /// Objects left alone because the backend already held a copy.
    pub skipped: Vec<(ObjectId, BackendId)>,
}

impl ObjectHandle {
    /// Move this object and the objects selected by `reach` to `target`,
    /// or, without one, to the backend the root's master picks.
    ///
    /// Stops at the first failure. Objects moved before it stay where they
    /// went and are skipped when the call is repeated.
    pub async fn move_graph(
        &self,
        target: Option<BackendId>,
        reach: Reach,
    ) -> OrbResult<PlacementReport> {
        let runtime = self.runtime();
        let graph = runtime.reachable(self.id(), reach).await?;
        let mut target = target;
        let mut report = PlacementReport::default();
        for metadata in graph {
            if let Some(t) = target {
                if metadata.is_master(&t) {
                    report.skipped.push((metadata.id, t));
                    continue;
                }
                if metadata.is_replica(&t) {
                    warn!(
                        id = %metadata.id,
                        target = %t,
                        "replica holder cannot take mastership, skipping"
                    );
                    report.skipped.push((metadata.id, t));
                    continue;
                }
            }
            let placed = runtime.move_one(&metadata, target).await?;
            target.get_or_insert(placed);
            report.placed.push((metadata.id, placed));
        }
        info!(
            root = %self.id(),
            ?reach,
            moved = report.placed.len(),
            skipped = report.skipped.len(),
            "moved object graph"
        );
        Ok(report)
    }

    /// Give each of `targets` a replica of this object and of the objects
    /// selected by `reach`. With no targets the root's master picks one
    /// backend and the rest of the graph follows it there.
    ///
    /// Stops at the first failure, like [`move_graph`](Self::move_graph).
    pub async fn replicate_graph(
        &self,
        targets: &[BackendId],
        reach: Reach,
    ) -> OrbResult<PlacementReport> {
        let runtime = self.runtime();
        let mut members = runtime.reachable(self.id(), reach).await?.into_iter();
        let mut targets = targets.to_vec();
        let mut report = PlacementReport::default();
        if targets.is_empty() {
            if let Some(root) = members.next() {
                let chosen = runtime.replicate_one(&root, None).await?;
                report.placed.push((root.id, chosen));
                targets.push(chosen);
            }
        }
        for metadata in members {
            for target in &targets {
                if metadata.holds_copy(target) {
                    report.skipped.push((metadata.id, *target));
                    continue;
                }
                let placed = runtime.replicate_one(&metadata, Some(*target)).await?;
                report.placed.push((metadata.id, placed));
            }
        }
        info!(
            root = %self.id(),
            ?reach,
            replicated = report.placed.len(),
            skipped = report.skipped.len(),
            "replicated object graph"
        );
        Ok(report)
    }
}

impl ClientRuntime {
    /// Move every object mastered by `backend` to the other backends.
    /// Returns how many moved.
    pub async fn drain_backend(&self, backend: BackendId) -> OrbResult<usize> {
        self.flush_all().await?;
        let moved = self.backends().get(&backend)?.move_all_objects().await?;
        info!(%backend, moved, "drained backend");
        Ok(moved)
    }

    /// Metadata of the root and of the objects `reach` selects, root first.
    async fn reachable(&self, id: ObjectId, reach: Reach) -> OrbResult<Vec<ObjectMetadata>> {
        let root = self.directory().get(&id).await?;
        let home = root.master_backend_id;
        let mut seen = HashSet::from([root.id]);
        let mut queue = VecDeque::from([root]);
        let mut graph = Vec::new();
        while let Some(metadata) = queue.pop_front() {
            if reach != Reach::Object {
                for next_id in self.persistent_refs(&metadata).await? {
                    if !seen.insert(next_id) {
                        continue;
                    }
                    match self.directory().try_get(&next_id).await? {
                        Some(next) if reach == Reach::All || next.is_master(&home) => {
                            queue.push_back(next)
                        }
                        Some(_) => {}
                        None => debug!(id = %next_id, "skipping reference to a deleted object"),
                    }
                }
            }
            graph.push(metadata);
        }
        debug!(root = %id, ?reach, objects = graph.len(), "collected object graph");
        Ok(graph)
    }

    /// Identities referenced from the master state of an object, after
    /// pushing any local changes to it.
    async fn persistent_refs(&self, metadata: &ObjectMetadata) -> OrbResult<Vec<ObjectId>> {
        let id = metadata.id;
        self.heap.flush(id).await?;
        let (bytes, _) = self
            .router
            .call(
                id,
                Some(metadata.master_backend_id),
                move |api: Arc<dyn BackendApi>| -> RpcFuture<Vec<u8>> {
                    Box::pin(async move { api.get_state(id).await })
                },
            )
            .await?;
        Ok(Envelope::from_bytes(&bytes)?.persistent_refs())
    }

    async fn move_one(
        &self,
        metadata: &ObjectMetadata,
        target: Option<BackendId>,
    ) -> OrbResult<BackendId> {
        let id = metadata.id;
        self.heap.flush(id).await?;
        let (master, _) = self
            .router
            .call(
                id,
                Some(metadata.master_backend_id),
                move |api: Arc<dyn BackendApi>| -> RpcFuture<BackendId> {
                    Box::pin(async move { api.move_object(id, target).await })
                },
            )
            .await?;
        if let Some(cell) = self.proxies.get(&id) {
            cell.set_hint(Some(master));
        }
        Ok(master)
    }

    async fn replicate_one(
        &self,
        metadata: &ObjectMetadata,
        target: Option<BackendId>,
    ) -> OrbResult<BackendId> {
        let id = metadata.id;
        self.heap.flush(id).await?;
        let (holder, _) = self
            .router
            .call(
                id,
                Some(metadata.master_backend_id),
                move |api: Arc<dyn BackendApi>| -> RpcFuture<BackendId> {
                    Box::pin(async move { api.new_replica(id, target).await })
                },
            )
            .await?;
        Ok(holder)
    }
}
