use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use orb_types::{BackendId, ObjectId, OrbError, OrbResult};

use crate::value::Value;

/// Named fields of an object.
pub type Fields = BTreeMap<String, Value>;

/// Shared handle to an object instance.
pub type ObjectRef = Arc<ObjectCell>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process-local identity of an object instance.
///
/// Assigned from a monotonic counter at construction. Graph traversal keys
/// its visited map on this, so volatile objects (which have no
/// [`ObjectId`]) are still tracked by instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One object instance: class, fields, and persistence bookkeeping.
///
/// A cell is *volatile* until [`assign_identity`](Self::assign_identity)
/// is called, after which it is a persistent object (or a proxy for one).
/// A proxy created for a remote object starts unloaded; its fields are
/// filled when state is materialized locally.
pub struct ObjectCell {
    instance: InstanceId,
    class: String,
    identity: OnceLock<ObjectId>,
    hint: RwLock<Option<BackendId>>,
    fields: RwLock<Fields>,
    loaded: AtomicBool,
}

impl ObjectCell {
    /// A new volatile object with no fields.
    pub fn new(class: impl Into<String>) -> ObjectRef {
        Self::with_fields(class, Fields::new())
    }

    /// A new volatile object with initial fields.
    pub fn with_fields(class: impl Into<String>, fields: Fields) -> ObjectRef {
        Arc::new(Self {
            instance: InstanceId::next(),
            class: class.into(),
            identity: OnceLock::new(),
            hint: RwLock::new(None),
            fields: RwLock::new(fields),
            loaded: AtomicBool::new(true),
        })
    }

    /// An unloaded proxy for a persistent object.
    pub fn proxy(id: ObjectId, class: impl Into<String>, hint: Option<BackendId>) -> ObjectRef {
        let identity = OnceLock::new();
        let _ = identity.set(id);
        Arc::new(Self {
            instance: InstanceId::next(),
            class: class.into(),
            identity,
            hint: RwLock::new(hint),
            fields: RwLock::new(Fields::new()),
            loaded: AtomicBool::new(false),
        })
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn identity(&self) -> Option<ObjectId> {
        self.identity.get().copied()
    }

    pub fn is_persistent(&self) -> bool {
        self.identity.get().is_some()
    }

    /// Give this object its persistent identity.
    ///
    /// Re-assigning the same identity is a no-op; assigning a different one
    /// is rejected.
    pub fn assign_identity(&self, id: ObjectId) -> OrbResult<()> {
        match self.identity.get() {
            Some(existing) if *existing == id => Ok(()),
            Some(existing) => Err(OrbError::InvalidArgument(format!(
                "instance {} already has identity {existing}",
                self.instance
            ))),
            None => {
                let _ = self.identity.set(id);
                // A concurrent assignment may have won the race.
                match self.identity.get() {
                    Some(current) if *current == id => Ok(()),
                    _ => Err(OrbError::already_exists(format!(
                        "identity for instance {}",
                        self.instance
                    ))),
                }
            }
        }
    }

    /// Believed location of the master copy. May be stale.
    pub fn hint(&self) -> Option<BackendId> {
        *self.hint.read().expect("lock poisoned")
    }

    pub fn set_hint(&self, hint: Option<BackendId>) {
        *self.hint.write().expect("lock poisoned") = hint;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::Release);
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.read().expect("lock poisoned").get(field).cloned()
    }

    /// Set one field, returning the previous value.
    pub fn set(&self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields
            .write()
            .expect("lock poisoned")
            .insert(field.into(), value)
    }

    /// Unset one field, returning its value.
    pub fn remove(&self, field: &str) -> Option<Value> {
        self.fields.write().expect("lock poisoned").remove(field)
    }

    /// Consistent copy of all fields.
    pub fn snapshot(&self) -> Fields {
        self.fields.read().expect("lock poisoned").clone()
    }

    /// Replace every field at once.
    pub fn replace_fields(&self, fields: Fields) {
        *self.fields.write().expect("lock poisoned") = fields;
    }

    /// Drop all fields. Breaks reference cycles through this cell.
    pub fn clear_fields(&self) {
        self.fields.write().expect("lock poisoned").clear();
    }

    /// Run `f` with shared access to the fields.
    pub fn with_fields_ref<R>(&self, f: impl FnOnce(&Fields) -> R) -> R {
        f(&self.fields.read().expect("lock poisoned"))
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl fmt::Debug for ObjectCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCell")
            .field("instance", &self.instance)
            .field("class", &self.class)
            .field("identity", &self.identity())
            .field("hint", &self.hint())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Releases the graph below a dropped object with an explicit stack, so a
/// long chain of objects owned only by each other does not recurse once
/// per link.
impl Drop for ObjectCell {
    fn drop(&mut self) {
        let mut values: Vec<Value> = take_fields(&mut self.fields).into_values().collect();
        while let Some(value) = values.pop() {
            match value {
                Value::Object(obj) => {
                    if let Ok(mut cell) = Arc::try_unwrap(obj) {
                        values.extend(take_fields(&mut cell.fields).into_values());
                    }
                }
                Value::List(items) => values.extend(items),
                Value::Map(map) => values.extend(map.into_values()),
                _ => {}
            }
        }
    }
}

fn take_fields(fields: &mut RwLock<Fields>) -> Fields {
    std::mem::take(fields.get_mut().unwrap_or_else(PoisonError::into_inner))
}
