//! State Node
//!
//! Identity, feature maps and per-node extension data.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{
    ConstantPool, ElementListenerMap, FeatureKind, NodeChange, NodeId, NodeMap, TreeConfig,
    TreeError,
};

/// Feature map attached to a node
#[derive(Debug, Clone)]
pub enum Feature {
    Map(NodeMap),
    Listeners(ElementListenerMap),
}

impl Feature {
    /// Property map backing the feature
    pub fn node_map(&self) -> &NodeMap {
        match self {
            Feature::Map(map) => map,
            Feature::Listeners(listeners) => listeners.node_map(),
        }
    }
}

struct NodeInner {
    id: NodeId,
    features: IndexMap<FeatureKind, Feature>,
    enabled: Cell<bool>,
    attached: Cell<bool>,
    node_data: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

/// Node of the state tree; cloning yields another handle to the same node
#[derive(Clone)]
pub struct StateNode {
    inner: Rc<NodeInner>,
}

impl StateNode {
    /// Create a detached node with the given features
    pub fn new(
        id: NodeId,
        features: &[FeatureKind],
        pool: &ConstantPool,
        config: &TreeConfig,
    ) -> Self {
        let features = features
            .iter()
            .map(|&kind| {
                let feature = match kind {
                    FeatureKind::ElementListeners => {
                        Feature::Listeners(ElementListenerMap::with_always_true_filter(
                            id,
                            pool.clone(),
                            &config.always_true_filter,
                        ))
                    }
                    _ => Feature::Map(NodeMap::new(id, kind)),
                };
                (kind, feature)
            })
            .collect();

        Self {
            inner: Rc::new(NodeInner {
                id,
                features,
                enabled: Cell::new(true),
                attached: Cell::new(false),
                node_data: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.get()
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        self.inner.attached.set(attached);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.set(enabled);
    }

    pub fn has_feature(&self, kind: FeatureKind) -> bool {
        self.inner.features.contains_key(&kind)
    }

    pub fn feature(&self, kind: FeatureKind) -> Option<&Feature> {
        self.inner.features.get(&kind)
    }

    /// Property map of a feature
    pub fn map(&self, kind: FeatureKind) -> Option<&NodeMap> {
        self.feature(kind).map(Feature::node_map)
    }

    /// Listener map, if the node has the listener feature
    pub fn listeners(&self) -> Option<&ElementListenerMap> {
        match self.feature(FeatureKind::ElementListeners) {
            Some(Feature::Listeners(listeners)) => Some(listeners),
            _ => None,
        }
    }

    /// Store a payload, replacing any earlier payload of the same type
    pub fn set_node_data<T: Any>(&self, data: T) {
        self.inner
            .node_data
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::new(data));
    }

    /// Payload of type `T`, if one is stored
    pub fn node_data<T: Any>(&self) -> Option<Rc<T>> {
        self.require_node_data().ok()
    }

    /// Payload of type `T`; absence is reported as an error
    pub fn require_node_data<T: Any>(&self) -> Result<Rc<T>, TreeError> {
        let type_name = std::any::type_name::<T>();
        let data = self
            .inner
            .node_data
            .borrow()
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(TreeError::MissingNodeData { type_name })?;

        data.downcast::<T>().map_err(|_| {
            tracing::error!(
                node = %self.inner.id,
                type_name,
                "node data stored under a foreign type id"
            );
            TreeError::NodeDataTypeMismatch { type_name }
        })
    }

    /// Remove and return the payload of type `T`
    pub fn remove_node_data<T: Any>(&self) -> Option<Rc<T>> {
        let data = self.inner.node_data.borrow_mut().remove(&TypeId::of::<T>())?;
        data.downcast::<T>().ok()
    }

    /// Debug snapshot keyed by feature id; `None` when no feature has data
    pub fn debug_json(&self) -> Option<Value> {
        let json: Map<String, Value> = self
            .inner
            .features
            .iter()
            .filter_map(|(kind, feature)| {
                feature
                    .node_map()
                    .debug_json()
                    .map(|data| (kind.id().to_string(), data))
            })
            .collect();

        (!json.is_empty()).then_some(Value::Object(json))
    }

    pub(crate) fn collect_changes(&self, out: &mut Vec<NodeChange>) {
        for feature in self.inner.features.values() {
            feature.node_map().collect_changes(out);
        }
    }

    pub fn ptr_eq(&self, other: &StateNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.inner.id)
            .field("features", &self.inner.features.keys().collect::<Vec<_>>())
            .field("enabled", &self.inner.enabled.get())
            .field("attached", &self.inner.attached.get())
            .finish()
    }
}
