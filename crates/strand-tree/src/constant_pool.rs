//! Constant Pool
//!
//! Content-addressed store for immutable JSON payloads shared with the
//! client. A payload is sent once per session; nodes reference it by id.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Digest bytes kept in an id (12 base64 characters with padding)
pub(crate) const DEFAULT_KEY_BYTES: usize = 8;

/// Reference to a JSON value by content hash
#[derive(Clone)]
pub struct ConstantPoolKey {
    id: String,
    json: Rc<Value>,
}

impl ConstantPoolKey {
    pub fn new(json: Value) -> Self {
        Self::with_key_bytes(json, DEFAULT_KEY_BYTES)
    }

    pub fn with_key_bytes(json: Value, key_bytes: usize) -> Self {
        Self {
            id: Self::calculate_hash(&json, key_bytes),
            json: Rc::new(json),
        }
    }

    /// Hash the compact serialization of `json`
    ///
    /// Object keys are sorted by `serde_json::Map`, so structurally equal
    /// values hash the same regardless of insertion order.
    pub fn calculate_hash(json: &Value, key_bytes: usize) -> String {
        let digest = Sha256::digest(json.to_string().as_bytes());
        let len = key_bytes.clamp(1, digest.len());
        STANDARD.encode(&digest[..len])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn json(&self) -> &Value {
        &self.json
    }
}

impl PartialEq for ConstantPoolKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConstantPoolKey {}

impl std::hash::Hash for ConstantPoolKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConstantPoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConstantPoolKey({}: {})", self.id, self.json)
    }
}

#[derive(Debug)]
struct PoolInner {
    key_bytes: usize,
    constants: IndexMap<String, Rc<Value>>,
    /// Ids interned since the last dump
    fresh: Vec<String>,
}

/// Session-scoped constant pool
///
/// Cloning yields another handle to the same pool. Entries are never
/// evicted; the pool is released when its last handle is dropped.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    inner: Rc<RefCell<PoolInner>>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::with_key_bytes(DEFAULT_KEY_BYTES)
    }

    pub fn with_key_bytes(key_bytes: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                key_bytes,
                constants: IndexMap::new(),
                fresh: Vec::new(),
            })),
        }
    }

    /// Key for `json` using this pool's id length, without registering it
    pub fn key_for(&self, json: Value) -> ConstantPoolKey {
        let key_bytes = self.inner.borrow().key_bytes;
        ConstantPoolKey::with_key_bytes(json, key_bytes)
    }

    /// Intern a value, returning the key of an identical earlier value if any
    pub fn intern(&self, json: Value) -> ConstantPoolKey {
        let key = self.key_for(json);
        self.intern_key(&key);
        key
    }

    /// Register an existing key; returns true if it was not known yet
    pub fn intern_key(&self, key: &ConstantPoolKey) -> bool {
        let mut inner = self.inner.borrow_mut();
        if let Some(existing) = inner.constants.get(key.id()) {
            if **existing != *key.json() {
                tracing::error!(id = key.id(), "constant pool hash collision");
            }
            return false;
        }

        inner.constants.insert(key.id.clone(), Rc::clone(&key.json));
        inner.fresh.push(key.id.clone());
        tracing::debug!(id = key.id(), size = inner.constants.len(), "interned constant");
        true
    }

    /// Look up a value by id
    pub fn get(&self, id: &str) -> Option<Value> {
        self.inner.borrow().constants.get(id).map(|v| (**v).clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.borrow().constants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().constants.is_empty()
    }

    /// Whether constants were interned since the last dump
    pub fn has_new_constants(&self) -> bool {
        !self.inner.borrow().fresh.is_empty()
    }

    /// Take the constants interned since the last dump as `{id: value}`
    pub fn dump_new_constants(&self) -> Option<Map<String, Value>> {
        let mut inner = self.inner.borrow_mut();
        if inner.fresh.is_empty() {
            return None;
        }

        let fresh = std::mem::take(&mut inner.fresh);
        let dump = fresh
            .into_iter()
            .filter_map(|id| {
                let value = inner.constants.get(&id)?;
                Some((id, (**value).clone()))
            })
            .collect();
        Some(dump)
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}
