//! Node Feature Map
//!
//! Structures node data as named properties. The map is reactive over its
//! key set: iterating registers a dependency that is invalidated when a
//! property is added. Reading a property by name does not. Value changes are
//! each property's own concern.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use strand_reactive::{
    ListenerRemover, Reactive, ReactiveChangeEvent, ReactiveEventRouter, ReactiveValue,
};

use crate::{FeatureKind, MapProperty, NodeChange, NodeId, PropertyValue};

/// Fired when a map creates a property for a new name
#[derive(Debug, Clone)]
pub struct MapPropertyAddEvent {
    pub property: MapProperty,
}

pub(crate) struct MapInner {
    node: NodeId,
    kind: FeatureKind,
    properties: RefCell<IndexMap<String, MapProperty>>,
    router: ReactiveEventRouter<MapPropertyAddEvent>,
    /// Names whose value changed since the last collection
    dirty: RefCell<IndexSet<String>>,
    /// Names whose value the client currently knows
    sent: RefCell<HashSet<String>>,
}

impl MapInner {
    pub(crate) fn mark_dirty(&self, name: &str) {
        let mut dirty = self.dirty.borrow_mut();
        if !dirty.contains(name) {
            dirty.insert(name.to_string());
        }
    }
}

/// Feature map of one state node; cloning yields another handle to it
#[derive(Clone)]
pub struct NodeMap {
    inner: Rc<MapInner>,
}

impl NodeMap {
    pub fn new(node: NodeId, kind: FeatureKind) -> Self {
        Self {
            inner: Rc::new(MapInner {
                node,
                kind,
                properties: RefCell::new(IndexMap::new()),
                router: ReactiveEventRouter::new(),
                dirty: RefCell::new(IndexSet::new()),
                sent: RefCell::new(HashSet::new()),
            }),
        }
    }

    /// Owning node
    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    pub fn kind(&self) -> FeatureKind {
        self.inner.kind
    }

    /// Get the property with the given name, creating it if necessary
    ///
    /// A [`MapPropertyAddEvent`] fires when a new property is created; this
    /// happens once per name for the lifetime of the map.
    pub fn get_property(&self, name: &str) -> MapProperty {
        let existing = self.inner.properties.borrow().get(name).cloned();
        if let Some(property) = existing {
            return property;
        }

        let property = MapProperty::new(name, Rc::downgrade(&self.inner));
        self.inner
            .properties
            .borrow_mut()
            .insert(name.to_string(), property.clone());

        self.inner.router.fire_event(&MapPropertyAddEvent {
            property: property.clone(),
        });
        property
    }

    /// Whether the property exists and has a value
    pub fn has_property_value(&self, name: &str) -> bool {
        self.inner
            .properties
            .borrow()
            .get(name)
            .is_some_and(MapProperty::has_value)
    }

    /// Visit every property, registering a dependency on the key set
    pub fn for_each_property(
        &self,
        reactive: &Reactive,
        mut visitor: impl FnMut(&str, &MapProperty),
    ) {
        self.inner.router.register_read(reactive);

        let snapshot: Vec<MapProperty> = self.inner.properties.borrow().values().cloned().collect();
        for property in &snapshot {
            visitor(property.name(), property);
        }
    }

    /// Number of properties ever created
    pub fn property_count(&self) -> usize {
        self.inner.properties.borrow().len()
    }

    /// Set the value of a property
    pub fn put(&self, name: &str, value: impl Into<PropertyValue>) {
        self.get_property(name).set(value);
    }

    /// Value of a property, without registering a dependency
    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.inner
            .properties
            .borrow()
            .get(name)
            .and_then(MapProperty::peek)
    }

    /// Whether `name` is in the visible key set
    pub fn contains(&self, name: &str) -> bool {
        self.has_property_value(name)
    }

    /// Remove `name` from the visible key set by clearing its value
    pub fn remove(&self, name: &str) -> Option<PropertyValue> {
        let property = self.inner.properties.borrow().get(name).cloned();
        property.and_then(|p| p.clear())
    }

    /// Names of properties that currently hold a value, in creation order
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .properties
            .borrow()
            .values()
            .filter(|p| p.has_value())
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Add a listener informed whenever a new property is added
    pub fn add_property_add_listener(
        &self,
        listener: impl Fn(&MapPropertyAddEvent) + 'static,
    ) -> ListenerRemover {
        self.inner.router.add_listener(listener)
    }

    /// Snapshot of the properties that have a value, keyed by name
    ///
    /// Returns `None` rather than an empty object when no property has a
    /// value, so "no feature data" stays distinct on the wire.
    pub fn debug_json(&self) -> Option<Value> {
        let json: Map<String, Value> = self
            .inner
            .properties
            .borrow()
            .values()
            .filter_map(|p| p.peek().map(|v| (p.name().to_string(), v.to_wire())))
            .collect();

        if json.is_empty() {
            None
        } else {
            Some(Value::Object(json))
        }
    }

    /// Whether values changed since the last collection
    pub fn has_changes(&self) -> bool {
        !self.inner.dirty.borrow().is_empty()
    }

    /// Drain pending value changes into `out`
    pub fn collect_changes(&self, out: &mut Vec<NodeChange>) {
        let dirty = std::mem::take(&mut *self.inner.dirty.borrow_mut());
        let mut sent = self.inner.sent.borrow_mut();

        for name in dirty {
            match self.get(&name) {
                Some(value) => {
                    sent.insert(name.clone());
                    out.push(NodeChange::Put {
                        node: self.inner.node,
                        feat: self.inner.kind.id(),
                        key: name,
                        value,
                    });
                }
                None => {
                    if sent.remove(&name) {
                        out.push(NodeChange::Remove {
                            node: self.inner.node,
                            feat: self.inner.kind.id(),
                            key: name,
                        });
                    }
                }
            }
        }
    }
}

impl ReactiveValue for NodeMap {
    fn add_reactive_change_listener(
        &self,
        listener: impl Fn(&ReactiveChangeEvent) + 'static,
    ) -> ListenerRemover {
        self.inner.router.add_change_listener(listener)
    }
}

impl fmt::Debug for NodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMap")
            .field("node", &self.inner.node)
            .field("kind", &self.inner.kind)
            .field("properties", &self.inner.properties.borrow().len())
            .finish()
    }
}
