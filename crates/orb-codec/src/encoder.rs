use std::collections::HashMap;

use orb_object::{ClassRegistry, InstanceId, ObjectCell, ObjectRef, Value};
use tracing::trace;

use crate::envelope::{to_payload, Entry, Envelope, Slot, MAX_NESTING};
use crate::error::{CodecError, CodecResult};

/// Flattens an object graph into an [`Envelope`].
///
/// One encoder serves one operation: the visited map and tag space start
/// empty and are discarded with the encoder. Volatile objects are queued
/// and flattened one at a time, so the depth of the graph does not grow
/// the call stack.
pub struct GraphEncoder<'a> {
    registry: &'a ClassRegistry,
    entries: Vec<Entry>,
    visited: HashMap<InstanceId, u32>,
    next_tag: u32,
    /// Volatile objects whose entry exists but whose fields are not
    /// encoded yet.
    pending: Vec<(u32, ObjectRef)>,
}

impl<'a> GraphEncoder<'a> {
    pub fn new(registry: &'a ClassRegistry) -> Self {
        Self {
            registry,
            entries: Vec::new(),
            visited: HashMap::new(),
            next_tag: 0,
            pending: Vec::new(),
        }
    }

    /// Encode an arbitrary value (method arguments, results, attributes).
    pub fn encode_value(mut self, value: &Value) -> CodecResult<Envelope> {
        self.entries.push(Entry::Immutable {
            payload: Vec::new(),
        });
        let slot = self.slot(value, 0)?;
        self.entries[0] = Entry::Immutable {
            payload: to_payload(&slot)?,
        };
        self.drain()?;
        Ok(self.finish())
    }

    /// Encode the state of `root` by value, even when `root` is persistent.
    ///
    /// Other persistent objects reachable from `root` are encoded by
    /// reference. References back to `root` become back-references.
    pub fn encode_state(mut self, root: &ObjectCell) -> CodecResult<Envelope> {
        let index = self.open(root)?;
        self.fill(index, root)?;
        self.drain()?;
        Ok(self.finish())
    }

    fn finish(self) -> Envelope {
        trace!(
            entries = self.entries.len(),
            volatile = self.next_tag,
            "encoded object graph"
        );
        Envelope::new(self.entries)
    }

    fn drain(&mut self) -> CodecResult<()> {
        while let Some((index, obj)) = self.pending.pop() {
            self.fill(index, &obj)?;
        }
        Ok(())
    }

    /// `depth` counts the lists and maps enclosing `value`.
    fn slot(&mut self, value: &Value, depth: usize) -> CodecResult<Slot> {
        if matches!(value, Value::List(_) | Value::Map(_)) && depth >= MAX_NESTING {
            return Err(CodecError::Encode(format!(
                "values nested deeper than {MAX_NESTING} levels"
            )));
        }
        Ok(match value {
            Value::Null => Slot::Null,
            Value::Bool(b) => Slot::Bool(*b),
            Value::Int(n) => Slot::Int(*n),
            Value::Float(x) => Slot::Float(*x),
            Value::Str(s) => Slot::Str(s.clone()),
            Value::Bytes(b) => Slot::Bytes(b.clone()),
            Value::List(items) => Slot::List(
                items
                    .iter()
                    .map(|item| self.slot(item, depth + 1))
                    .collect::<CodecResult<_>>()?,
            ),
            Value::Map(map) => Slot::Map(
                map.iter()
                    .map(|(k, v)| -> CodecResult<(String, Slot)> {
                        Ok((k.clone(), self.slot(v, depth + 1)?))
                    })
                    .collect::<CodecResult<_>>()?,
            ),
            Value::Object(obj) => Slot::Ref(self.reference(obj)?),
        })
    }

    /// Classify a reachable object and append the entry describing it.
    fn reference(&mut self, obj: &ObjectRef) -> CodecResult<u32> {
        if let Some(tag) = self.visited.get(&obj.instance()).copied() {
            return Ok(self.push(Entry::BackReference { tag }));
        }
        if let Some(id) = obj.identity() {
            return Ok(self.push(Entry::Persistent {
                id,
                class: obj.class_name().to_string(),
                hint: obj.hint(),
            }));
        }
        let index = self.open(obj)?;
        self.pending.push((index, ObjectRef::clone(obj)));
        Ok(index)
    }

    /// Append the volatile entry for `obj`, fields still empty.
    fn open(&mut self, obj: &ObjectCell) -> CodecResult<u32> {
        let class = obj.class_name();
        if !self.registry.contains(class) {
            return Err(CodecError::UnregisteredClass(class.to_string()));
        }
        // Registered before its fields are encoded, so cycles back to
        // `obj` terminate.
        let tag = self.next_tag;
        self.next_tag += 1;
        self.visited.insert(obj.instance(), tag);
        Ok(self.push(Entry::Volatile {
            tag,
            class: class.to_string(),
            payload: Vec::new(),
        }))
    }

    fn fill(&mut self, index: u32, obj: &ObjectCell) -> CodecResult<()> {
        let fields = obj.snapshot();
        let mut slots = Vec::with_capacity(fields.len());
        for (name, value) in &fields {
            slots.push((name.clone(), self.slot(value, 0)?));
        }
        let encoded = to_payload(&slots)?;
        if let Some(Entry::Volatile { payload, .. }) = self.entries.get_mut(index as usize) {
            *payload = encoded;
        }
        Ok(())
    }

    fn push(&mut self, entry: Entry) -> u32 {
        self.entries.push(entry);
        (self.entries.len() - 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_object::{ClassDescriptor, ObjectCell};
    use orb_types::{BackendId, ObjectId};

    fn registry() -> ClassRegistry {
        let registry = ClassRegistry::new();
        registry.register(ClassDescriptor::new("Node"));
        registry
    }

    #[test]
    fn primitives_are_a_single_immutable_entry() {
        let registry = registry();
        let env = GraphEncoder::new(&registry)
            .encode_value(&Value::List(vec![Value::Int(1), Value::from("x")]))
            .unwrap();
        assert_eq!(env.len(), 1);
        assert!(matches!(env.entries[0], Entry::Immutable { .. }));
    }

    #[test]
    fn shared_volatile_is_flattened_once() {
        let registry = registry();
        let root = ObjectCell::new("Node");
        let shared = ObjectCell::new("Node");
        root.set("x", Value::Object(shared.clone()));
        root.set("y", Value::Object(shared));

        let env = GraphEncoder::new(&registry).encode_state(&root).unwrap();
        let volatile = env
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::Volatile { .. }))
            .count();
        let backrefs = env
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::BackReference { .. }))
            .count();
        assert_eq!(volatile, 2);
        assert_eq!(backrefs, 1);
    }

    #[test]
    fn persistent_objects_are_sent_by_reference() {
        let registry = registry();
        let root = ObjectCell::new("Node");
        let id = ObjectId::new();
        let hint = BackendId::new();
        let other = ObjectCell::proxy(id, "Elsewhere", Some(hint));
        root.set("link", Value::Object(other));

        let env = GraphEncoder::new(&registry).encode_state(&root).unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(
            env.entries[1],
            Entry::Persistent {
                id,
                class: "Elsewhere".into(),
                hint: Some(hint),
            }
        );
    }

    #[test]
    fn self_cycle_becomes_back_reference() {
        let registry = registry();
        let root = ObjectCell::new("Node");
        root.set("me", Value::Object(root.clone()));
        let env = GraphEncoder::new(&registry).encode_state(&root).unwrap();
        assert_eq!(env.entries[1], Entry::BackReference { tag: 0 });
        root.clear_fields();
    }

    #[test]
    fn unregistered_class_fails_to_serialize() {
        let registry = registry();
        let root = ObjectCell::new("Node");
        root.set("child", Value::Object(ObjectCell::new("Mystery")));
        let err = GraphEncoder::new(&registry).encode_state(&root).unwrap_err();
        assert_eq!(err, CodecError::UnregisteredClass("Mystery".into()));
        assert!(err.is_encode());
    }

    #[test]
    fn deep_chains_encode_without_recursing() {
        let registry = registry();
        let nodes: Vec<ObjectRef> = (0..20_000).map(|_| ObjectCell::new("Node")).collect();
        for pair in nodes.windows(2) {
            pair[0].set("next", Value::Object(pair[1].clone()));
        }
        let env = GraphEncoder::new(&registry).encode_state(&nodes[0]).unwrap();
        assert_eq!(env.len(), 20_000);
        assert!(env
            .entries
            .iter()
            .all(|e| matches!(e, Entry::Volatile { .. })));
    }

    #[test]
    fn over_nested_values_fail_to_serialize() {
        let registry = registry();
        let mut value = Value::Int(0);
        for _ in 0..=MAX_NESTING {
            value = Value::List(vec![value]);
        }
        let err = GraphEncoder::new(&registry)
            .encode_value(&value)
            .unwrap_err();
        assert!(err.is_encode());
        assert!(matches!(
            orb_types::OrbError::from(err),
            orb_types::OrbError::Serialization { .. }
        ));
    }
}
