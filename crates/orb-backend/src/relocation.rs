//! Moving and replicating objects between backends.
//!
//! A relocation runs at the master and walks
//!
//! ```text
//! Idle -> Locked -> Transferring -> Committed
//!            \            \
//!             +------------+-----> Aborted
//! ```
//!
//! The object's write lock is held from `Locked` until the relocation
//! ends, so no operation observes the object mid-flight. The directory
//! update is the commit point: before it, an abort leaves the source and
//! the directory as they were; after it, the source drops its copy.

use std::collections::HashMap;
use std::fmt;

use orb_protocol::{BackendApi, PutMode};
use orb_types::{BackendId, LockMode, ObjectId, ObjectMetadata, OrbError, OrbResult, Stage};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::runtime::BackendRuntime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveState {
    Idle,
    Locked,
    Transferring,
    Committed,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocationKind {
    /// Hand mastership to the target.
    Move,
    /// Give the target a read replica.
    Replicate,
}

impl RelocationKind {
    fn put_mode(self) -> PutMode {
        match self {
            Self::Move => PutMode::Master,
            Self::Replicate => PutMode::Replica,
        }
    }
}

impl fmt::Display for RelocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move => f.write_str("move"),
            Self::Replicate => f.write_str("replicate"),
        }
    }
}

/// Result of a committed relocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelocationReport {
    pub id: ObjectId,
    pub kind: RelocationKind,
    pub target: BackendId,
    /// Every state the relocation passed through, `Idle` first.
    pub trace: Vec<MoveState>,
}

/// Why a relocation stopped before committing.
struct Abort {
    error: OrbError,
    /// The target copy may be discarded: the directory does not (and will
    /// not) name the target for this object.
    discard_target: bool,
}

impl Abort {
    fn clean(error: OrbError) -> Self {
        Self {
            error,
            discard_target: true,
        }
    }

    fn keep_target(error: OrbError) -> Self {
        Self {
            error,
            discard_target: false,
        }
    }
}

struct Relocation {
    id: ObjectId,
    kind: RelocationKind,
    target: BackendId,
    trace: Vec<MoveState>,
}

impl Relocation {
    fn new(id: ObjectId, kind: RelocationKind, target: BackendId) -> Self {
        Self {
            id,
            kind,
            target,
            trace: vec![MoveState::Idle],
        }
    }

    fn state(&self) -> MoveState {
        self.trace.last().copied().unwrap_or(MoveState::Idle)
    }

    fn advance(&mut self, next: MoveState) {
        debug!(
            id = %self.id,
            kind = %self.kind,
            target = %self.target,
            from = ?self.state(),
            to = ?next,
            "relocation state"
        );
        self.trace.push(next);
    }

    fn into_report(self) -> RelocationReport {
        RelocationReport {
            id: self.id,
            kind: self.kind,
            target: self.target,
            trace: self.trace,
        }
    }
}

impl BackendRuntime {
    /// Move or replicate `id`, which this backend must master.
    ///
    /// Without an explicit `target` a random reachable backend holding no
    /// copy is chosen. A CAS conflict at commit surfaces as
    /// `ConcurrentModification` and is not retried.
    pub async fn relocate(
        &self,
        id: ObjectId,
        kind: RelocationKind,
        target: Option<BackendId>,
    ) -> OrbResult<RelocationReport> {
        self.check_running()?;
        let _pin = self.heap.pin(id);
        let metadata = self.directory.get(&id).await?;
        self.require_master(&metadata)?;
        let target = self.choose_target(&metadata, kind, target).await?;
        let peer = self.peers.get(&target)?;

        let mut relocation = Relocation::new(id, kind, target);
        let guard = match self
            .locks
            .acquire(id, LockMode::Write, Some(self.config.lock_timeout()))
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                relocation.advance(MoveState::Aborted);
                return Err(e);
            }
        };
        relocation.advance(MoveState::Locked);

        match self.transfer_and_commit(&mut relocation, peer.as_ref()).await {
            Ok(()) => {
                relocation.advance(MoveState::Committed);
                if kind == RelocationKind::Move {
                    self.drop_local_copy(&id, Some(target));
                }
                drop(guard);
                info!(backend = %self.id, %id, %kind, %target, "relocation committed");
                Ok(relocation.into_report())
            }
            Err(abort) => {
                let transferred = relocation.state() == MoveState::Transferring;
                relocation.advance(MoveState::Aborted);
                if transferred && abort.discard_target {
                    if let Err(e) = peer.discard_state(id).await {
                        warn!(%id, %target, error = %e, "could not discard aborted copy");
                    }
                }
                drop(guard);
                warn!(backend = %self.id, %id, %kind, %target, error = %abort.error, "relocation aborted");
                Err(abort.error)
            }
        }
    }

    /// Hand every object mastered here to the other reachable backends,
    /// topping each up toward an even share. Every planned move is
    /// attempted; the first failure is returned after the rest ran.
    pub async fn move_all(&self) -> OrbResult<usize> {
        self.check_running()?;
        let others: Vec<BackendId> = self
            .directory
            .backends()
            .await?
            .into_iter()
            .map(|info| info.id)
            .filter(|b| *b != self.id && self.peers.contains(b))
            .collect();
        if others.is_empty() {
            return Err(OrbError::unavailable(
                self.id,
                Stage::Transfer,
                "no other backend to take its objects",
            ));
        }

        let objects = self.directory.objects().await?;
        let mut load: HashMap<BackendId, usize> = others.iter().map(|b| (*b, 0)).collect();
        let mut mine = Vec::new();
        for metadata in &objects {
            if metadata.is_master(&self.id) {
                mine.push(metadata.id);
            } else if let Some(count) = load.get_mut(&metadata.master_backend_id) {
                *count += 1;
            }
        }
        let share = objects.len().div_ceil(others.len());

        let mut moved = 0;
        let mut first_error = None;
        let mut pending = mine.into_iter();
        'targets: for target in &others {
            while load[target] < share {
                let Some(id) = pending.next() else {
                    break 'targets;
                };
                match self.relocate(id, RelocationKind::Move, Some(*target)).await {
                    Ok(_) => moved += 1,
                    Err(e) => {
                        warn!(backend = %self.id, %id, %target, error = %e, "could not move object away");
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(count) = load.get_mut(target) {
                    *count += 1;
                }
            }
        }
        info!(backend = %self.id, moved, "moved objects to other backends");
        match first_error {
            Some(e) => Err(e),
            None => Ok(moved),
        }
    }

    fn require_master(&self, metadata: &ObjectMetadata) -> OrbResult<()> {
        if metadata.is_master(&self.id) {
            Ok(())
        } else {
            Err(OrbError::NotMaster {
                id: metadata.id,
                master: Some(metadata.master_backend_id),
            })
        }
    }

    async fn choose_target(
        &self,
        metadata: &ObjectMetadata,
        kind: RelocationKind,
        requested: Option<BackendId>,
    ) -> OrbResult<BackendId> {
        let id = metadata.id;
        if let Some(target) = requested {
            if metadata.is_master(&target) {
                return Err(OrbError::InvalidArgument(format!(
                    "{target} already masters {id}"
                )));
            }
            if metadata.is_replica(&target) {
                return match kind {
                    RelocationKind::Move => Err(OrbError::InvalidArgument(format!(
                        "{target} holds a replica of {id} and cannot become its master"
                    ))),
                    RelocationKind::Replicate => {
                        Err(OrbError::already_exists(format!("replica of {id} on {target}")))
                    }
                };
            }
            return Ok(target);
        }

        let candidates: Vec<BackendId> = self
            .directory
            .backends()
            .await?
            .into_iter()
            .map(|info| info.id)
            .filter(|b| !metadata.holds_copy(b) && self.peers.contains(b))
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| {
                OrbError::unavailable(
                    format!("{kind} target for {id}"),
                    Stage::Transfer,
                    "no eligible backend",
                )
            })
    }

    async fn transfer_and_commit(
        &self,
        relocation: &mut Relocation,
        peer: &dyn BackendApi,
    ) -> Result<(), Abort> {
        let id = relocation.id;
        let target = relocation.target;

        // Mastership may have changed while the lock was contended.
        let metadata = self.directory.get(&id).await.map_err(Abort::clean)?;
        self.require_master(&metadata).map_err(Abort::clean)?;

        self.heap.flush(id).await.map_err(Abort::clean)?;
        let instance = self
            .ensure_loaded(id, &metadata.class_name)
            .await
            .map_err(Abort::clean)?;
        let state = self.encode_state(&instance).map_err(Abort::clean)?;

        relocation.advance(MoveState::Transferring);
        let timeout = self.config.transfer_timeout();
        let target_name = format!("backend {}", target.short_id());
        let put = peer.put_state(id, state, relocation.kind.put_mode());
        match tokio::time::timeout(timeout, put).await {
            Err(_) => {
                let reason = format!("no ack within {timeout:?}");
                return Err(Abort::clean(OrbError::unavailable(
                    target_name,
                    Stage::Transfer,
                    reason,
                )));
            }
            Ok(Err(e)) if e.is_retryable() => {
                return Err(Abort::clean(OrbError::unavailable(
                    target_name,
                    Stage::Transfer,
                    e,
                )));
            }
            Ok(Err(e)) => return Err(Abort::clean(e)),
            Ok(Ok(())) => {}
        }

        match relocation.kind {
            RelocationKind::Move => self.commit_move(id, target).await,
            RelocationKind::Replicate => self.commit_replica(id, target).await,
        }
    }

    async fn commit_move(&self, id: ObjectId, target: BackendId) -> Result<(), Abort> {
        match self
            .directory
            .compare_and_swap_master(&id, self.id, target)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(Abort::clean(OrbError::ConcurrentModification {
                id,
                stage: Stage::Commit,
            })),
            Err(e) => self
                .settle_commit(id, e, |metadata| metadata.is_master(&target))
                .await,
        }
    }

    async fn commit_replica(&self, id: ObjectId, target: BackendId) -> Result<(), Abort> {
        match self.directory.add_replica_if_absent(&id, target).await {
            Ok(true) => Ok(()),
            // Someone registered the target concurrently; its copy is live.
            Ok(false) => Err(Abort::keep_target(OrbError::ConcurrentModification {
                id,
                stage: Stage::Commit,
            })),
            Err(e) => self
                .settle_commit(id, e, |metadata| metadata.is_replica(&target))
                .await,
        }
    }

    /// The directory update failed with `error`; find out whether it
    /// applied anyway.
    async fn settle_commit(
        &self,
        id: ObjectId,
        error: OrbError,
        applied: impl Fn(&ObjectMetadata) -> bool,
    ) -> Result<(), Abort> {
        let unavailable = OrbError::unavailable("directory", Stage::Commit, &error);
        match self.directory.try_get(&id).await {
            Ok(Some(metadata)) if applied(&metadata) => {
                debug!(%id, error = %error, "directory update applied despite error");
                Ok(())
            }
            Ok(_) => Err(Abort::clean(unavailable)),
            // Outcome unknown: keep every copy.
            Err(_) => Err(Abort::keep_target(unavailable)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use orb_directory::Directory;
    use orb_protocol::{FramedBackend, LoopbackChannel};
    use orb_store::StateStore;

    use super::*;
    use crate::testing::{CasFault, Cluster};

    /// Replace the pool entry of backend `i` with a framed endpoint that
    /// can be taken offline.
    fn framed_endpoint(cluster: &Cluster, i: usize) -> Arc<LoopbackChannel> {
        let backend = cluster.backend(i);
        let channel = Arc::new(LoopbackChannel::new(backend.clone()));
        cluster.pool.insert(Arc::new(FramedBackend::new(
            backend.id(),
            channel.clone(),
            Duration::from_millis(200),
        )));
        channel
    }

    // ---------------------------------------------------------------
    // Move
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn move_hands_over_mastership() {
        let cluster = Cluster::start(2).await;
        let (source, target) = (cluster.backend(0), cluster.backend(1));
        let id = cluster.counter(0, 0).await;
        cluster.incr(0, id).await.unwrap();

        let report = source
            .relocate(id, RelocationKind::Move, Some(target.id()))
            .await
            .unwrap();
        assert_eq!(
            report.trace,
            vec![
                MoveState::Idle,
                MoveState::Locked,
                MoveState::Transferring,
                MoveState::Committed
            ]
        );
        assert_eq!(cluster.master(id).await, target.id());

        // The source forgot everything; the target serves the flushed state.
        assert!(!source.heap().contains(&id));
        assert!(!source.store().exists(&id).unwrap());
        assert_eq!(source.cached_role(&id), None);
        assert_eq!(cluster.read_count(1, id).await.unwrap(), 1);
        assert_eq!(cluster.incr(1, id).await.unwrap(), 2);

        let err = cluster.read_count(0, id).await.unwrap_err();
        assert_eq!(
            err,
            OrbError::NotMaster {
                id,
                master: Some(target.id())
            }
        );
    }

    #[tokio::test]
    async fn move_without_target_picks_another_backend() {
        let cluster = Cluster::start(3).await;
        let id = cluster.counter(0, 4).await;
        let target = cluster.backend(0).move_object(id, None).await.unwrap();
        assert_ne!(target, cluster.backend(0).id());
        assert_eq!(cluster.master(id).await, target);
    }

    #[tokio::test]
    async fn move_must_start_at_master() {
        let cluster = Cluster::start(2).await;
        let id = cluster.counter(0, 0).await;
        let err = cluster
            .backend(1)
            .move_object(id, Some(cluster.backend(1).id()))
            .await
            .unwrap_err();
        assert!(err.needs_reresolve());
    }

    #[tokio::test]
    async fn move_to_self_or_replica_is_rejected() {
        let cluster = Cluster::start(2).await;
        let source = cluster.backend(0);
        let id = cluster.counter(0, 0).await;
        assert!(matches!(
            source.move_object(id, Some(source.id())).await,
            Err(OrbError::InvalidArgument(_))
        ));

        let replica = cluster.backend(1).id();
        source.new_replica(id, Some(replica)).await.unwrap();
        assert!(matches!(
            source.move_object(id, Some(replica)).await,
            Err(OrbError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn no_eligible_target_is_unavailable() {
        let cluster = Cluster::start(1).await;
        let id = cluster.counter(0, 0).await;
        let err = cluster.backend(0).move_object(id, None).await.unwrap_err();
        assert!(matches!(
            err,
            OrbError::Unavailable {
                stage: Stage::Transfer,
                ..
            }
        ));
    }

    // ---------------------------------------------------------------
    // Aborts
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn offline_target_aborts_at_transfer() {
        let cluster = Cluster::start(2).await;
        let source = cluster.backend(0);
        let id = cluster.counter(0, 3).await;
        let channel = framed_endpoint(&cluster, 1);
        channel.set_offline(true);

        let err = source
            .move_object(id, Some(cluster.backend(1).id()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrbError::Unavailable {
                stage: Stage::Transfer,
                ..
            }
        ));
        assert_eq!(cluster.master(id).await, source.id());
        assert_eq!(cluster.read_count(0, id).await.unwrap(), 3);
        assert!(!cluster.backend(1).store().exists(&id).unwrap());
    }

    #[tokio::test]
    async fn failed_commit_discards_target_copy() {
        let cluster = Cluster::start(2).await;
        let source = cluster.backend(0);
        let target = cluster.backend(1);
        let id = cluster.counter(0, 3).await;
        cluster.directory.set_cas_fault(CasFault::FailBefore);

        let err = source.move_object(id, Some(target.id())).await.unwrap_err();
        assert!(matches!(
            err,
            OrbError::Unavailable {
                stage: Stage::Commit,
                ..
            }
        ));
        assert_eq!(cluster.master(id).await, source.id());
        assert!(source.store().exists(&id).unwrap());
        assert!(!target.store().exists(&id).unwrap());
        assert_eq!(cluster.incr(0, id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn commit_that_applied_despite_error_completes() {
        let cluster = Cluster::start(2).await;
        let source = cluster.backend(0);
        let target = cluster.backend(1);
        let id = cluster.counter(0, 3).await;
        cluster.directory.set_cas_fault(CasFault::FailAfter);

        let moved = source.move_object(id, Some(target.id())).await.unwrap();
        assert_eq!(moved, target.id());
        assert_eq!(cluster.master(id).await, target.id());
        assert!(!source.store().exists(&id).unwrap());
        cluster.directory.set_cas_fault(CasFault::None);
        assert_eq!(cluster.read_count(1, id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn mastership_lost_while_waiting_aborts() {
        let cluster = Cluster::start(3).await;
        let source = cluster.backend(0);
        let id = cluster.counter(0, 0).await;
        // Mastership changes while the relocation waits for the lock.
        let report = {
            let intruder = cluster.backend(2).id();
            let guard = source
                .locks
                .acquire(id, LockMode::Write, None)
                .await
                .unwrap();
            let moving = source.relocate(id, RelocationKind::Move, Some(cluster.backend(1).id()));
            let race = async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cluster
                    .directory
                    .compare_and_swap_master(&id, source.id(), intruder)
                    .await
                    .unwrap();
                drop(guard);
            };
            let (report, ()) = tokio::join!(moving, race);
            report
        };
        let err = report.unwrap_err();
        assert!(err.needs_reresolve());
        assert_eq!(cluster.master(id).await, cluster.backend(2).id());
        assert!(!cluster.backend(1).store().exists(&id).unwrap());
    }

    #[tokio::test]
    async fn lost_cas_is_concurrent_modification() {
        let cluster = Cluster::start(2).await;
        let source = cluster.backend(0);
        let target = cluster.backend(1);
        let id = cluster.counter(0, 0).await;
        cluster.directory.set_cas_fault(CasFault::Lose);

        let err = source.move_object(id, Some(target.id())).await.unwrap_err();
        assert_eq!(
            err,
            OrbError::ConcurrentModification {
                id,
                stage: Stage::Commit
            }
        );
        assert!(!target.store().exists(&id).unwrap());
        assert!(source.store().exists(&id).unwrap());
    }

    #[tokio::test]
    async fn lock_timeout_aborts_before_transfer() {
        let cluster = Cluster::start(2).await;
        let source = cluster.backend(0);
        let id = cluster.counter(0, 0).await;
        let _held = source
            .locks
            .acquire(id, LockMode::Read, None)
            .await
            .unwrap();
        let err = source
            .move_object(id, Some(cluster.backend(1).id()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrbError::LockTimeout { .. }));
        assert_eq!(cluster.master(id).await, source.id());
    }

    #[tokio::test]
    async fn read_racing_a_move_is_sent_to_the_new_master() {
        let cluster = Cluster::start(2).await;
        let (source, target) = (cluster.backend(0), cluster.backend(1));
        let id = cluster.counter(0, 3).await;
        source.move_object(id, Some(target.id())).await.unwrap();
        target.move_object(id, Some(source.id())).await.unwrap();
        // Cold cache: the next read learns the role from the directory.
        source.forget_ownership(&id);

        // The read learns "master is source", but only after the move to
        // the target has committed.
        cluster
            .directory
            .answer_next_get_late(Duration::from_millis(150));
        let read = cluster.read_count(0, id);
        let moving = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            source.move_object(id, Some(target.id())).await
        };
        let (read, moved) = tokio::join!(read, moving);
        assert_eq!(moved.unwrap(), target.id());

        let redirect = OrbError::NotMaster {
            id,
            master: Some(target.id()),
        };
        assert_eq!(read.unwrap_err(), redirect);
        assert_eq!(source.cached_role(&id), None);
        assert_eq!(cluster.read_count(0, id).await.unwrap_err(), redirect);
        assert_eq!(cluster.read_count(1, id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn missing_state_of_a_moved_object_redirects() {
        let cluster = Cluster::start(2).await;
        let (source, target) = (cluster.backend(0), cluster.backend(1));
        let id = cluster.counter(0, 1).await;
        // Stale role left behind, as if cached just before the move.
        let stale = source.ownership(id).await.unwrap();
        source.move_object(id, Some(target.id())).await.unwrap();
        source.set_ownership(id, stale);

        let _guard = source
            .locks
            .acquire(id, LockMode::Read, None)
            .await
            .unwrap();
        let err = source.ensure_loaded(id, "Counter").await.unwrap_err();
        assert_eq!(
            err,
            OrbError::NotMaster {
                id,
                master: Some(target.id())
            }
        );
        assert_eq!(source.cached_role(&id), None);
    }

    // ---------------------------------------------------------------
    // Replication
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn replicas_serve_reads_only() {
        let cluster = Cluster::start(2).await;
        let (master, replica) = (cluster.backend(0), cluster.backend(1));
        let id = cluster.counter(0, 0).await;
        cluster.incr(0, id).await.unwrap();

        let report = master
            .relocate(id, RelocationKind::Replicate, Some(replica.id()))
            .await
            .unwrap();
        assert_eq!(report.trace.last(), Some(&MoveState::Committed));

        let metadata = cluster.directory.get(&id).await.unwrap();
        assert!(metadata.is_master(&master.id()));
        assert!(metadata.is_replica(&replica.id()));
        assert!(master.heap().contains(&id));

        assert_eq!(cluster.read_count(1, id).await.unwrap(), 1);
        assert_eq!(replica.cached_role(&id), Some(crate::runtime::Role::Replica));
        let err = cluster.incr(1, id).await.unwrap_err();
        assert_eq!(
            err,
            OrbError::NotMaster {
                id,
                master: Some(master.id())
            }
        );
        assert!(matches!(
            master.new_replica(id, Some(replica.id())).await,
            Err(OrbError::AlreadyExists { .. })
        ));
        assert!(matches!(
            replica.discard_state(id).await,
            Err(OrbError::InvalidArgument(_))
        ));
    }

    // ---------------------------------------------------------------
    // Draining
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn move_all_spreads_objects_evenly() {
        let cluster = Cluster::start(3).await;
        let mut ids = Vec::new();
        for n in 0..4 {
            ids.push(cluster.counter(0, n).await);
        }
        ids.push(cluster.counter(1, 9).await);

        let moved = cluster.backend(0).move_all().await.unwrap();
        assert_eq!(moved, 4);

        let mut per_backend = HashMap::new();
        for id in &ids {
            *per_backend.entry(cluster.master(*id).await).or_insert(0) += 1;
        }
        assert_eq!(per_backend.get(&cluster.backend(0).id()), None);
        let mut shares = vec![
            per_backend[&cluster.backend(1).id()],
            per_backend[&cluster.backend(2).id()],
        ];
        shares.sort();
        assert_eq!(shares, vec![2, 3]);
        for (n, id) in ids[..4].iter().enumerate() {
            let master = cluster.master(*id).await;
            let i = cluster.backends.iter().position(|b| b.id() == master).unwrap();
            assert_eq!(cluster.read_count(i, *id).await.unwrap(), n as i64);
        }
    }

    #[tokio::test]
    async fn move_all_needs_another_backend() {
        let cluster = Cluster::start(1).await;
        cluster.counter(0, 0).await;
        assert!(matches!(
            cluster.backend(0).move_all().await,
            Err(OrbError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn move_all_reports_failures_after_trying_everything() {
        let cluster = Cluster::start(2).await;
        let a = cluster.counter(0, 1).await;
        let b = cluster.counter(0, 2).await;
        let _held = cluster
            .backend(0)
            .heap()
            .locks()
            .acquire(a, LockMode::Write, None)
            .await
            .unwrap();

        let err = cluster.backend(0).move_all().await.unwrap_err();
        assert!(matches!(err, OrbError::LockTimeout { .. }));
        assert_eq!(cluster.master(a).await, cluster.backend(0).id());
        assert_eq!(cluster.master(b).await, cluster.backend(1).id());
    }
}
