use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use orb_lock::LockManager;
use orb_object::ObjectRef;
use orb_types::{LockMode, ObjectId, OrbResult};
use tracing::{debug, info, warn};

use crate::config::HeapConfig;
use crate::sink::FlushSink;

struct HeapEntry {
    instance: ObjectRef,
    dirty: bool,
    /// Bumped on every modification; a flush only clears `dirty` if the
    /// version it wrote is still current.
    version: u64,
    last_access: Instant,
}

impl HeapEntry {
    fn new(instance: ObjectRef, dirty: bool) -> Self {
        Self {
            instance,
            dirty,
            version: 1,
            last_access: Instant::now(),
        }
    }
}

#[derive(Default)]
struct HeapState {
    entries: HashMap<ObjectId, HeapEntry>,
    pins: HashMap<ObjectId, usize>,
}

impl HeapState {
    fn pinned(&self, id: &ObjectId) -> bool {
        self.pins.get(id).is_some_and(|n| *n > 0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EvictReason {
    Idle,
    Pressure,
}

/// Outcome of one eviction sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub evicted: usize,
    /// Skipped because the object lock was held.
    pub busy: usize,
    /// Skipped because the entry was touched, pinned or re-dirtied after
    /// it was selected.
    pub skipped: usize,
    pub flush_failures: usize,
}

/// Keeps an identity out of eviction while held.
pub struct PinGuard {
    state: Arc<Mutex<HeapState>>,
    id: ObjectId,
}

impl PinGuard {
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(count) = state.pins.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&self.id);
            }
        }
    }
}

/// Process-local cache of materialized objects keyed by identity.
///
/// At most one entry exists per identity. Residency is reported to the
/// [`LockManager`] so lock slots of resident objects are kept.
pub struct HeapManager {
    state: Arc<Mutex<HeapState>>,
    locks: LockManager,
    sink: Arc<dyn FlushSink>,
    config: HeapConfig,
}

impl HeapManager {
    pub fn new(config: HeapConfig, locks: LockManager, sink: Arc<dyn FlushSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HeapState::default())),
            locks,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // ---------------------------------------------------------------
    // Residency
    // ---------------------------------------------------------------

    /// Insert or replace the entry for `id` and mark it dirty. Returns the
    /// instance it replaced, if any.
    ///
    /// Only for state that differs from the backend-of-record. State just
    /// read from it goes through [`put_loaded`](Self::put_loaded) or
    /// [`insert_loaded_if_absent`](Self::insert_loaded_if_absent), which
    /// leave the entry clean so it is never written back for nothing.
    pub fn put(&self, id: ObjectId, instance: ObjectRef) -> Option<ObjectRef> {
        let mut state = self.state.lock().expect("lock poisoned");
        let previous = match state.entries.get_mut(&id) {
            Some(entry) => {
                let old = std::mem::replace(&mut entry.instance, instance);
                entry.dirty = true;
                entry.version += 1;
                entry.last_access = Instant::now();
                Some(old)
            }
            None => {
                state.entries.insert(id, HeapEntry::new(instance, true));
                None
            }
        };
        self.locks.set_resident(id, true);
        previous
    }

    /// Insert or replace a clean entry just loaded from the backend-of-record.
    ///
    /// A dirty entry is kept as it is: its changes have not reached the
    /// backend-of-record yet. Returns whether the entry was stored.
    pub fn put_loaded(&self, id: ObjectId, instance: ObjectRef) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.entries.get(&id).is_some_and(|entry| entry.dirty) {
            debug!(%id, "kept dirty entry over loaded state");
            return false;
        }
        state.entries.insert(id, HeapEntry::new(instance, false));
        self.locks.set_resident(id, true);
        true
    }

    /// Insert a clean entry unless one exists. Returns the resident
    /// instance, which is the existing one if a concurrent load won.
    pub fn insert_loaded_if_absent(&self, id: ObjectId, instance: ObjectRef) -> ObjectRef {
        let mut state = self.state.lock().expect("lock poisoned");
        let entry = state
            .entries
            .entry(id)
            .or_insert_with(|| HeapEntry::new(instance, false));
        entry.last_access = Instant::now();
        let resident = ObjectRef::clone(&entry.instance);
        self.locks.set_resident(id, true);
        resident
    }

    /// Cached instance for `id`, refreshing its last access time. `None`
    /// means the caller must fetch from the authoritative backend.
    pub fn get(&self, id: &ObjectId) -> Option<ObjectRef> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.entries.get_mut(id).map(|entry| {
            entry.last_access = Instant::now();
            ObjectRef::clone(&entry.instance)
        })
    }

    /// Cached instance without touching its access time.
    pub fn peek(&self, id: &ObjectId) -> Option<ObjectRef> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .entries
            .get(id)
            .map(|entry| ObjectRef::clone(&entry.instance))
    }

    /// Drop the entry unless it holds unflushed changes. Returns whether
    /// `id` is no longer resident.
    pub fn remove_clean(&self, id: &ObjectId) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        match state.entries.get(id) {
            None => return true,
            Some(entry) if entry.dirty => return false,
            Some(_) => {}
        }
        if let Some(entry) = state.entries.remove(id) {
            entry.instance.set_loaded(false);
        }
        self.locks.set_resident(*id, false);
        true
    }

    /// Drop the entry without flushing. For callers that have already
    /// handed the state elsewhere or are discarding it.
    pub fn remove(&self, id: &ObjectId) -> Option<ObjectRef> {
        let mut state = self.state.lock().expect("lock poisoned");
        let removed = state.entries.remove(id).map(|entry| entry.instance);
        if removed.is_some() {
            self.locks.set_resident(*id, false);
        }
        removed
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.state
            .lock()
            .expect("lock poisoned")
            .entries
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let state = self.state.lock().expect("lock poisoned");
        let mut ids: Vec<ObjectId> = state.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    // ---------------------------------------------------------------
    // Dirty tracking
    // ---------------------------------------------------------------

    /// Record a modification. Returns `false` if `id` is not resident.
    pub fn mark_dirty(&self, id: &ObjectId) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        match state.entries.get_mut(id) {
            Some(entry) => {
                entry.dirty = true;
                entry.version += 1;
                entry.last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn is_dirty(&self, id: &ObjectId) -> bool {
        self.state
            .lock()
            .expect("lock poisoned")
            .entries
            .get(id)
            .is_some_and(|entry| entry.dirty)
    }

    pub fn dirty_ids(&self) -> Vec<ObjectId> {
        let state = self.state.lock().expect("lock poisoned");
        let mut ids: Vec<ObjectId> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Write the state of `id` through the sink if dirty.
    ///
    /// Returns `Ok(true)` if something was written. The dirty flag is
    /// cleared only on success and only if no modification happened while
    /// the write was in flight.
    pub async fn flush(&self, id: ObjectId) -> OrbResult<bool> {
        let (instance, version) = {
            let state = self.state.lock().expect("lock poisoned");
            match state.entries.get(&id) {
                Some(entry) if entry.dirty => (ObjectRef::clone(&entry.instance), entry.version),
                _ => return Ok(false),
            }
        };

        self.sink.flush(id, &instance).await?;

        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(entry) = state.entries.get_mut(&id) {
            if entry.version == version && Arc::ptr_eq(&entry.instance, &instance) {
                entry.dirty = false;
            }
        }
        debug!(%id, version, "flushed object state");
        Ok(true)
    }

    /// Flush every dirty entry without evicting anything.
    ///
    /// Every entry is attempted; the first failure is returned after the
    /// rest have been tried. Returns the number of entries written.
    pub async fn flush_all(&self) -> OrbResult<usize> {
        let mut flushed = 0;
        let mut first_error = None;
        for id in self.dirty_ids() {
            match self.flush(id).await {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%id, error = %e, "flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(flushed, "flushed all dirty objects");
                Ok(flushed)
            }
        }
    }

    /// Flush and evict one entry, waiting for its write lock.
    ///
    /// Returns `Ok(false)` if `id` was not resident. On flush failure the
    /// entry stays resident and the error is returned.
    pub async fn unload(&self, id: ObjectId) -> OrbResult<bool> {
        if !self.contains(&id) {
            return Ok(false);
        }
        let guard = self
            .locks
            .acquire(id, LockMode::Write, Some(self.config.unload_timeout()))
            .await?;
        self.flush(id).await?;
        let removed = self.remove(&id);
        if let Some(instance) = &removed {
            instance.set_loaded(false);
        }
        drop(guard);
        debug!(%id, "unloaded object");
        Ok(removed.is_some())
    }

    // ---------------------------------------------------------------
    // Pinning
    // ---------------------------------------------------------------

    /// Pin `id` for the lifetime of the returned guard. `id` need not be
    /// resident yet.
    pub fn pin(&self, id: ObjectId) -> PinGuard {
        let mut state = self.state.lock().expect("lock poisoned");
        *state.pins.entry(id).or_insert(0) += 1;
        PinGuard {
            state: Arc::clone(&self.state),
            id,
        }
    }

    pub fn is_pinned(&self, id: &ObjectId) -> bool {
        self.state.lock().expect("lock poisoned").pinned(id)
    }

    // ---------------------------------------------------------------
    // Eviction
    // ---------------------------------------------------------------

    /// Evict idle entries (and, over `max_resident`, the least recently
    /// used ones), flushing dirty state first.
    pub async fn evict_sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// [`evict_sweep`](Self::evict_sweep) with an explicit notion of now.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let candidates = self.candidates(now);
        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for (id, reason) in candidates {
            let Some(guard) = self.locks.try_acquire(id, LockMode::Write) else {
                report.busy += 1;
                continue;
            };
            if self.is_dirty(&id) {
                if let Err(e) = self.flush(id).await {
                    warn!(%id, error = %e, "flush failed; entry kept for next sweep");
                    report.flush_failures += 1;
                    continue;
                }
            }
            if self.evict_if_quiet(id, now, reason) {
                report.evicted += 1;
            } else {
                report.skipped += 1;
            }
            drop(guard);
        }

        if report.evicted > 0 || report.flush_failures > 0 {
            info!(
                evicted = report.evicted,
                busy = report.busy,
                flush_failures = report.flush_failures,
                resident = self.len(),
                "heap sweep"
            );
        }
        report
    }

    fn candidates(&self, now: Instant) -> Vec<(ObjectId, EvictReason)> {
        let state = self.state.lock().expect("lock poisoned");
        let threshold = self.config.idle_threshold();

        let mut chosen: Vec<(ObjectId, EvictReason)> = state
            .entries
            .iter()
            .filter(|(id, entry)| {
                !state.pinned(id) && now.saturating_duration_since(entry.last_access) > threshold
            })
            .map(|(id, _)| (*id, EvictReason::Idle))
            .collect();

        if let (Some(max), Some(low)) = (self.config.max_resident, self.config.low_watermark()) {
            if state.entries.len() > max {
                let excess = state
                    .entries
                    .len()
                    .saturating_sub(low)
                    .saturating_sub(chosen.len());
                let mut lru: Vec<(&ObjectId, Instant)> = state
                    .entries
                    .iter()
                    .filter(|(id, _)| !state.pinned(id))
                    .filter(|(id, _)| !chosen.iter().any(|(c, _)| c == *id))
                    .map(|(id, entry)| (id, entry.last_access))
                    .collect();
                lru.sort_by_key(|(_, at)| *at);
                chosen.extend(
                    lru.into_iter()
                        .take(excess)
                        .map(|(id, _)| (*id, EvictReason::Pressure)),
                );
            }
        }
        chosen
    }

    /// Remove `id` if it is still evictable. The caller holds its write
    /// lock.
    fn evict_if_quiet(&self, id: ObjectId, now: Instant, reason: EvictReason) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.pinned(&id) {
            return false;
        }
        let threshold = self.config.idle_threshold();
        let evictable = state.entries.get(&id).is_some_and(|entry| {
            !entry.dirty
                && (reason == EvictReason::Pressure
                    || now.saturating_duration_since(entry.last_access) > threshold)
        });
        if !evictable {
            return false;
        }
        if let Some(entry) = state.entries.remove(&id) {
            entry.instance.set_loaded(false);
        }
        self.locks.set_resident(id, false);
        debug!(%id, ?reason, "evicted object");
        true
    }
}

impl fmt::Debug for HeapManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapManager")
            .field("resident", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
