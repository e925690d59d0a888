use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use orb_types::{LockMode, ObjectId, OrbError, OrbResult};
use tracing::debug;

use crate::cell::{Fields, ObjectCell};
use crate::value::Value;

/// A method that only reads fields.
pub type ReadFn = fn(&Fields, &[Value]) -> Result<Value, String>;

/// A method that may mutate fields.
pub type WriteFn = fn(&mut Fields, &[Value]) -> Result<Value, String>;

/// A named operation on a class.
#[derive(Clone, Copy)]
pub enum Method {
    Read(ReadFn),
    Write(WriteFn),
}

impl Method {
    /// Lock mode the method must hold while it runs.
    pub fn mode(&self) -> LockMode {
        match self {
            Self::Read(_) => LockMode::Read,
            Self::Write(_) => LockMode::Write,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(_) => write!(f, "Method::Read"),
            Self::Write(_) => write!(f, "Method::Write"),
        }
    }
}

/// A reusable set of methods attached to classes by composition.
///
/// Several classes can share one capability (for example a messaging or
/// counter interface) without a common base class.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn methods(&self) -> Vec<(&'static str, Method)>;
}

/// Describes one class: its declared fields, methods and capabilities.
#[derive(Clone, Debug)]
pub struct ClassDescriptor {
    name: String,
    fields: BTreeSet<String>,
    methods: BTreeMap<String, Method>,
    capabilities: BTreeSet<String>,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeSet::new(),
            methods: BTreeMap::new(),
            capabilities: BTreeSet::new(),
        }
    }

    /// Declare a field. Declared fields are informational; objects may
    /// carry undeclared ones.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into());
        self
    }

    pub fn read_method(mut self, name: impl Into<String>, f: ReadFn) -> Self {
        self.methods.insert(name.into(), Method::Read(f));
        self
    }

    pub fn write_method(mut self, name: impl Into<String>, f: WriteFn) -> Self {
        self.methods.insert(name.into(), Method::Write(f));
        self
    }

    /// Compose a capability's methods into this class. Methods already
    /// defined on the class take precedence.
    pub fn with_capability(mut self, capability: &dyn Capability) -> Self {
        for (name, method) in capability.methods() {
            self.methods.entry(name.to_string()).or_insert(method);
        }
        self.capabilities.insert(capability.name().to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn method(&self, name: &str) -> Option<Method> {
        self.methods.get(name).copied()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    /// Look up a method or fail with `DoesNotExist`.
    pub fn require_method(&self, name: &str) -> OrbResult<Method> {
        self.method(name)
            .ok_or_else(|| OrbError::does_not_exist(format!("method {}.{name}", self.name)))
    }

    /// Run `method` against `cell`.
    ///
    /// Write methods operate on a copy of the fields that replaces the
    /// original only when the method succeeds, so a failed call leaves the
    /// object untouched. The caller holds the object lock that
    /// [`Method::mode`] asks for.
    pub fn call(&self, method: &str, cell: &ObjectCell, args: &[Value]) -> OrbResult<Value> {
        let id = cell.identity().unwrap_or_else(|| ObjectId::from_bytes([0; 16]));
        let failed = |message: String| OrbError::MethodFailed {
            id,
            method: method.to_string(),
            message,
        };
        match self.require_method(method)? {
            Method::Read(f) => cell.with_fields_ref(|fields| f(fields, args)).map_err(failed),
            Method::Write(f) => {
                let mut working = cell.snapshot();
                let result = f(&mut working, args).map_err(failed)?;
                cell.replace_fields(working);
                debug!(class = %self.name, method, "committed write method");
                Ok(result)
            }
        }
    }
}

/// Registry of class descriptors known to a runtime.
///
/// A class missing from the registry cannot be introspected, so objects of
/// that class cannot be serialized by value.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<String, Arc<ClassDescriptor>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a class.
    pub fn register(&self, descriptor: ClassDescriptor) -> Arc<ClassDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.classes
            .write()
            .expect("lock poisoned")
            .insert(descriptor.name().to_string(), Arc::clone(&descriptor));
        descriptor
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.classes.read().expect("lock poisoned").get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().expect("lock poisoned").contains_key(name)
    }

    /// Look up a class or fail with `DoesNotExist`.
    pub fn require(&self, name: &str) -> OrbResult<Arc<ClassDescriptor>> {
        self.get(name)
            .ok_or_else(|| OrbError::does_not_exist(format!("class {name}")))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
