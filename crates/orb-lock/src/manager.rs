use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orb_types::{LockMode, ObjectId, OrbError, OrbResult, Stage};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, trace};

type LockTable = Mutex<LockState>;

#[derive(Default)]
struct LockState {
    slots: HashMap<ObjectId, LockSlot>,
    /// Identities the heap holds a materialized copy of. Tracked apart
    /// from the slots so residency never creates a lock handle.
    resident: HashSet<ObjectId>,
}

impl LockState {
    /// Drop the slot of `id` once it has no users and is not resident.
    fn reclaim(&mut self, id: &ObjectId) -> bool {
        let idle = self.slots.get(id).is_some_and(|slot| slot.users == 0);
        if idle && !self.resident.contains(id) {
            self.slots.remove(id);
            return true;
        }
        false
    }
}

struct LockSlot {
    lock: Arc<RwLock<()>>,
    /// Holders plus pending waiters.
    users: usize,
}

impl LockSlot {
    fn new() -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            users: 0,
        }
    }
}

/// Registers one user of a slot; unregisters (and possibly reclaims the
/// slot) on drop. Covers both held guards and waiters that give up.
struct UseTicket {
    table: Arc<LockTable>,
    id: ObjectId,
}

impl UseTicket {
    fn register(table: &Arc<LockTable>, id: ObjectId) -> (Self, Arc<RwLock<()>>) {
        let mut state = table.lock().expect("lock poisoned");
        let slot = state.slots.entry(id).or_insert_with(LockSlot::new);
        slot.users += 1;
        let lock = Arc::clone(&slot.lock);
        (
            Self {
                table: Arc::clone(table),
                id,
            },
            lock,
        )
    }
}

impl Drop for UseTicket {
    fn drop(&mut self) {
        let mut state = self.table.lock().expect("lock poisoned");
        if let Some(slot) = state.slots.get_mut(&self.id) {
            slot.users = slot.users.saturating_sub(1);
            if state.reclaim(&self.id) {
                trace!(id = %self.id, "reclaimed lock");
            }
        }
    }
}

enum Held {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Proof that the caller holds a lock on one identity.
///
/// Dropping the guard releases the lock first, then the use count.
pub struct ObjectLockGuard {
    id: ObjectId,
    mode: LockMode,
    held: Option<Held>,
    _ticket: UseTicket,
}

impl ObjectLockGuard {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for ObjectLockGuard {
    fn drop(&mut self) {
        // Release the lock before the ticket can reclaim the slot.
        self.held.take();
    }
}

impl fmt::Debug for ObjectLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLockGuard")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish()
    }
}

/// One reader/writer lock per object identity, created lazily.
///
/// Cloning is cheap; clones share the same lock table.
#[derive(Clone, Default)]
pub struct LockManager {
    table: Arc<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `mode` on `id`, waiting at most `timeout` if given.
    ///
    /// On timeout the waiter is withdrawn and `LockTimeout` is returned;
    /// no lock is retained. Dropping the returned future has the same
    /// effect.
    pub async fn acquire(
        &self,
        id: ObjectId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> OrbResult<ObjectLockGuard> {
        let (ticket, lock) = UseTicket::register(&self.table, id);
        let wait = async move {
            match mode {
                LockMode::Read => Held::Read(lock.read_owned().await),
                LockMode::Write => Held::Write(lock.write_owned().await),
            }
        };
        let held = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(held) => held,
                Err(_) => {
                    debug!(%id, %mode, ?limit, "lock acquisition timed out");
                    return Err(OrbError::LockTimeout {
                        id,
                        mode,
                        stage: Stage::Lock,
                    });
                }
            },
            None => wait.await,
        };
        Ok(ObjectLockGuard {
            id,
            mode,
            held: Some(held),
            _ticket: ticket,
        })
    }

    /// Acquire without waiting. Returns `None` if the lock is contended.
    pub fn try_acquire(&self, id: ObjectId, mode: LockMode) -> Option<ObjectLockGuard> {
        let (ticket, lock) = UseTicket::register(&self.table, id);
        let held = match mode {
            LockMode::Read => lock.try_read_owned().ok().map(Held::Read),
            LockMode::Write => lock.try_write_owned().ok().map(Held::Write),
        }?;
        Some(ObjectLockGuard {
            id,
            mode,
            held: Some(held),
            _ticket: ticket,
        })
    }

    /// Explicit form of dropping a guard.
    pub fn release(&self, guard: ObjectLockGuard) {
        drop(guard);
    }

    /// Record whether the heap currently holds `id`. A resident identity
    /// keeps an existing lock slot alive with no users; it never creates
    /// one.
    pub fn set_resident(&self, id: ObjectId, resident: bool) {
        let mut state = self.table.lock().expect("lock poisoned");
        if resident {
            state.resident.insert(id);
        } else if state.resident.remove(&id) {
            state.reclaim(&id);
        }
    }

    pub fn is_resident(&self, id: &ObjectId) -> bool {
        self.table.lock().expect("lock poisoned").resident.contains(id)
    }

    /// Whether a lock slot currently exists for `id`.
    pub fn is_tracked(&self, id: &ObjectId) -> bool {
        self.table.lock().expect("lock poisoned").slots.contains_key(id)
    }

    /// Holders plus waiters on `id`.
    pub fn users(&self, id: &ObjectId) -> usize {
        self.table
            .lock()
            .expect("lock poisoned")
            .slots
            .get(id)
            .map_or(0, |slot| slot.users)
    }

    /// Number of live lock slots.
    pub fn tracked_count(&self) -> usize {
        self.table.lock().expect("lock poisoned").slots.len()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("tracked", &self.tracked_count())
            .finish()
    }
}
