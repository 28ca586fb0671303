//! Map Property
//!
//! A single named reactive slot inside a node feature map.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Serialize, Serializer};
use serde_json::Value;
use strand_reactive::{
    ListenerRemover, Reactive, ReactiveChangeEvent, ReactiveEventRouter, ReactiveValue,
};

use crate::ConstantPoolKey;
use crate::node_map::MapInner;

/// Value held by a map property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Json(Value),
    /// Reference into the session constant pool
    Constant(ConstantPoolKey),
}

impl PropertyValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PropertyValue::Json(v) => Some(v),
            PropertyValue::Constant(_) => None,
        }
    }

    pub fn as_constant(&self) -> Option<&ConstantPoolKey> {
        match self {
            PropertyValue::Constant(key) => Some(key),
            PropertyValue::Json(_) => None,
        }
    }

    /// JSON sent to the client; constants travel as their pool id
    pub fn to_wire(&self) -> Value {
        match self {
            PropertyValue::Json(v) => v.clone(),
            PropertyValue::Constant(key) => Value::String(key.id().to_string()),
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PropertyValue::Json(v) => v.serialize(serializer),
            PropertyValue::Constant(key) => serializer.serialize_str(key.id()),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Json(value)
    }
}

impl From<ConstantPoolKey> for PropertyValue {
    fn from(key: ConstantPoolKey) -> Self {
        PropertyValue::Constant(key)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Json(Value::String(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Json(Value::Bool(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Json(Value::from(value))
    }
}

/// Fired by a property when its value changes
#[derive(Debug, Clone)]
pub struct MapPropertyChangeEvent {
    pub name: String,
    pub old: Option<PropertyValue>,
    pub new: Option<PropertyValue>,
}

struct PropertyInner {
    name: String,
    value: RefCell<Option<PropertyValue>>,
    router: ReactiveEventRouter<MapPropertyChangeEvent>,
    owner: Weak<MapInner>,
}

/// Named reactive slot; cloning yields another handle to the same slot
///
/// Setting a value equal to the current one is a no-op: no event fires and
/// the property is not marked for change collection.
#[derive(Clone)]
pub struct MapProperty {
    inner: Rc<PropertyInner>,
}

impl MapProperty {
    pub(crate) fn new(name: &str, owner: Weak<MapInner>) -> Self {
        Self {
            inner: Rc::new(PropertyInner {
                name: name.to_string(),
                value: RefCell::new(None),
                router: ReactiveEventRouter::new(),
                owner,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current value, registering a dependency for the running computation
    pub fn get(&self, reactive: &Reactive) -> Option<PropertyValue> {
        self.inner.router.register_read(reactive);
        self.peek()
    }

    /// Current value without registering a dependency
    pub fn peek(&self) -> Option<PropertyValue> {
        self.inner.value.borrow().clone()
    }

    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    pub fn set(&self, value: impl Into<PropertyValue>) {
        self.replace(Some(value.into()));
    }

    /// Remove the value; the property itself stays in its map
    pub fn clear(&self) -> Option<PropertyValue> {
        let old = self.peek();
        self.replace(None);
        old
    }

    fn replace(&self, new: Option<PropertyValue>) {
        let old = {
            let mut slot = self.inner.value.borrow_mut();
            if *slot == new {
                return;
            }
            std::mem::replace(&mut *slot, new.clone())
        };

        if let Some(owner) = self.inner.owner.upgrade() {
            owner.mark_dirty(&self.inner.name);
        }

        self.inner.router.fire_event(&MapPropertyChangeEvent {
            name: self.inner.name.clone(),
            old,
            new,
        });
    }

    /// Add a listener for value changes of this property
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&MapPropertyChangeEvent) + 'static,
    ) -> ListenerRemover {
        self.inner.router.add_listener(listener)
    }

    pub fn ptr_eq(&self, other: &MapProperty) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ReactiveValue for MapProperty {
    fn add_reactive_change_listener(
        &self,
        listener: impl Fn(&ReactiveChangeEvent) + 'static,
    ) -> ListenerRemover {
        self.inner.router.add_change_listener(listener)
    }
}

impl fmt::Debug for MapProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapProperty")
            .field("name", &self.inner.name)
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}
