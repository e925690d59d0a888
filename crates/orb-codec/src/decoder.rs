use std::collections::{BTreeMap, HashMap};

use orb_object::{ClassRegistry, Fields, ObjectCell, ObjectRef, Value};
use orb_types::ObjectId;

use crate::envelope::{fields_from_payload, slot_from_payload, Entry, Envelope, Slot};
use crate::error::{CodecError, CodecResult};
use crate::proxy::ProxyResolver;

/// Rebuilds an object graph from an [`Envelope`].
///
/// Tags are scoped to one decode. Every volatile instance is created and
/// registered under its tag before any fields are decoded, so
/// back-references (including cycles) resolve to that single instance.
/// Fields are then decoded entry by entry, without descending through
/// references. Persistent references go through the resolver and are
/// never decoded by value.
pub struct GraphDecoder<'a> {
    registry: &'a ClassRegistry,
    resolver: &'a dyn ProxyResolver,
    entries: &'a [Entry],
    used: Vec<bool>,
    tags: HashMap<u32, ObjectRef>,
    /// Instance created for each volatile entry, by entry index.
    cells: Vec<Option<ObjectRef>>,
    local: HashMap<ObjectId, ObjectRef>,
}

impl<'a> GraphDecoder<'a> {
    pub fn new(
        registry: &'a ClassRegistry,
        resolver: &'a dyn ProxyResolver,
        envelope: &'a Envelope,
    ) -> Self {
        Self {
            registry,
            resolver,
            entries: &envelope.entries,
            used: vec![false; envelope.entries.len()],
            tags: HashMap::new(),
            cells: vec![None; envelope.entries.len()],
            local: HashMap::new(),
        }
    }

    /// Decode the root as a value.
    pub fn decode_value(mut self) -> CodecResult<Value> {
        let entries = self.entries;
        let Some(root) = entries.first() else {
            return Err(CodecError::Malformed("empty envelope".into()));
        };
        self.create_instances(None)?;
        let value = match root {
            Entry::Immutable { payload } => {
                self.used[0] = true;
                self.value(slot_from_payload(payload)?)?
            }
            _ => self.reference(0)?,
        };
        self.fill_instances(false)?;
        self.check_all_used()?;
        Ok(value)
    }

    /// Decode an object state envelope into `root`, replacing its fields.
    ///
    /// `root` keeps its instance and identity. Nothing is modified unless
    /// the whole envelope decodes.
    pub fn decode_state_into(mut self, root: &ObjectRef) -> CodecResult<()> {
        let entries = self.entries;
        let Some(Entry::Volatile { class, payload, .. }) = entries.first() else {
            return Err(CodecError::Malformed("root is not an object state".into()));
        };
        if class != root.class_name() {
            return Err(CodecError::RootMismatch {
                expected: root.class_name().to_string(),
                found: class.clone(),
            });
        }

        self.used[0] = true;
        if let Some(id) = root.identity() {
            self.local.insert(id, ObjectRef::clone(root));
        }
        self.create_instances(Some(root))?;
        let fields = self.fields(payload)?;
        self.fill_instances(true)?;
        self.check_all_used()?;

        root.replace_fields(fields);
        root.set_loaded(true);
        Ok(())
    }

    /// Create the instance of every volatile entry. With `root` given,
    /// entry 0 stands for it instead of a new instance.
    fn create_instances(&mut self, root: Option<&ObjectRef>) -> CodecResult<()> {
        for (index, entry) in self.entries.iter().enumerate() {
            let Entry::Volatile { tag, class, .. } = entry else {
                continue;
            };
            if !self.registry.contains(class) {
                return Err(CodecError::UnknownClass(class.clone()));
            }
            let cell = match root {
                Some(root) if index == 0 => ObjectRef::clone(root),
                _ => ObjectCell::new(class.clone()),
            };
            if self.tags.insert(*tag, ObjectRef::clone(&cell)).is_some() {
                return Err(CodecError::DuplicateTag(*tag));
            }
            self.cells[index] = Some(cell);
        }
        Ok(())
    }

    /// Decode the fields of every volatile entry, except the root when the
    /// caller decodes it separately.
    fn fill_instances(&mut self, skip_root: bool) -> CodecResult<()> {
        let entries = self.entries;
        for (index, entry) in entries.iter().enumerate().skip(usize::from(skip_root)) {
            let Entry::Volatile { payload, .. } = entry else {
                continue;
            };
            let fields = self.fields(payload)?;
            if let Some(cell) = &self.cells[index] {
                cell.replace_fields(fields);
            }
        }
        Ok(())
    }

    /// The object entry `index` describes. Each entry but the root is
    /// referenced exactly once.
    fn reference(&mut self, index: u32) -> CodecResult<Value> {
        let entries = self.entries;
        let entry = entries
            .get(index as usize)
            .ok_or(CodecError::EntryOutOfRange(index))?;
        if std::mem::replace(&mut self.used[index as usize], true) {
            return Err(CodecError::EntryReused(index));
        }

        match entry {
            Entry::Immutable { .. } => Err(CodecError::Malformed(format!(
                "entry {index} is an inline value behind a reference"
            ))),
            Entry::Volatile { .. } => self.cells[index as usize]
                .as_ref()
                .map(|cell| Value::Object(ObjectRef::clone(cell)))
                .ok_or_else(|| CodecError::Malformed(format!("entry {index} has no instance"))),
            Entry::Persistent { id, class, hint } => {
                let obj = match self.local.get(id) {
                    Some(local) => ObjectRef::clone(local),
                    None => self.resolver.resolve(*id, class, *hint),
                };
                Ok(Value::Object(obj))
            }
            Entry::BackReference { tag } => self
                .tags
                .get(tag)
                .map(|obj| Value::Object(ObjectRef::clone(obj)))
                .ok_or(CodecError::DanglingBackReference(*tag)),
        }
    }

    fn fields(&mut self, payload: &[u8]) -> CodecResult<Fields> {
        let slots = fields_from_payload(payload)?;
        let mut fields = Fields::new();
        for (name, slot) in slots {
            let value = self.value(slot)?;
            fields.insert(name, value);
        }
        Ok(fields)
    }

    /// Slot nesting is bounded when the payload is read, so this recursion
    /// is too.
    fn value(&mut self, slot: Slot) -> CodecResult<Value> {
        Ok(match slot {
            Slot::Null => Value::Null,
            Slot::Bool(b) => Value::Bool(b),
            Slot::Int(n) => Value::Int(n),
            Slot::Float(x) => Value::Float(x),
            Slot::Str(s) => Value::Str(s),
            Slot::Bytes(b) => Value::Bytes(b),
            Slot::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.value(item))
                    .collect::<CodecResult<_>>()?,
            ),
            Slot::Map(pairs) => {
                let mut map = BTreeMap::new();
                for (key, item) in pairs {
                    let value = self.value(item)?;
                    map.insert(key, value);
                }
                Value::Map(map)
            }
            Slot::Ref(index) => self.reference(index)?,
        })
    }

    fn check_all_used(&self) -> CodecResult<()> {
        match self.used.iter().position(|used| !used) {
            Some(index) => Err(CodecError::Malformed(format!(
                "entry {index} is never referenced"
            ))),
            None => Ok(()),
        }
    }
}
