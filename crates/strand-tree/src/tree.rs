//! State Tree
//!
//! Allocates nodes, owns the session-scoped constant pool and reactive
//! context, routes client events to nodes and collects outbound changes.

use std::cell::{Cell, RefCell};
use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;
use strand_reactive::Reactive;
use tracing::{debug, warn};

use crate::event::EventMessage;
use crate::{
    ChangeBatch, ConstantPool, DomEvent, FeatureKind, NodeChange, NodeId, StateNode, TreeConfig,
    TreeError,
};

/// Server-side state tree of one session
pub struct StateTree {
    config: TreeConfig,
    nodes: RefCell<IndexMap<NodeId, StateNode>>,
    next_id: Cell<u32>,
    pool: ConstantPool,
    reactive: Reactive,
    /// Attach/detach changes not yet collected
    pending: RefCell<Vec<NodeChange>>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self {
            pool: ConstantPool::with_key_bytes(config.constant_key_bytes),
            config,
            nodes: RefCell::new(IndexMap::new()),
            next_id: Cell::new(NodeId::ROOT.0),
            reactive: Reactive::new(),
            pending: RefCell::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.pool
    }

    pub fn reactive(&self) -> &Reactive {
        &self.reactive
    }

    /// Allocate and attach a node with the given features
    pub fn create_node(&self, features: &[FeatureKind]) -> StateNode {
        let id = NodeId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let node = StateNode::new(id, features, &self.pool, &self.config);
        node.set_attached(true);
        self.nodes.borrow_mut().insert(id, node.clone());
        self.pending.borrow_mut().push(NodeChange::Attach { node: id });

        debug!(node = %id, features = features.len(), "attached node");
        node
    }

    pub fn node(&self, id: NodeId) -> Option<StateNode> {
        self.nodes.borrow().get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Detach a node; its id is never reused
    pub fn detach(&self, id: NodeId) -> Result<StateNode, TreeError> {
        let node = self
            .nodes
            .borrow_mut()
            .shift_remove(&id)
            .ok_or(TreeError::UnknownNode(id))?;

        node.set_attached(false);
        self.pending.borrow_mut().push(NodeChange::Detach { node: id });
        debug!(node = %id, "detached node");
        Ok(node)
    }

    /// Deliver an event to the listeners of its source node
    ///
    /// The node's enabled state at dispatch time replaces whatever the
    /// event carries.
    pub fn dispatch_event(&self, event: &DomEvent) -> Result<(), TreeError> {
        let node = self
            .node(event.source())
            .ok_or(TreeError::UnknownNode(event.source()))?;

        if let Some(listeners) = node.listeners() {
            let event = event.clone().with_source_enabled(node.is_enabled());
            listeners.fire_event(&event);
        }
        Ok(())
    }

    /// Parse a client event message and dispatch it
    ///
    /// Expects `{"node": id, "event": type, "data": {...}}`; the debounce
    /// phase is read from `data.for`.
    pub fn handle_event_message(&self, message: &Value) -> Result<(), TreeError> {
        let message: EventMessage = serde_json::from_value(message.clone())?;
        let Some(node) = self.node(message.node) else {
            warn!(
                node = %message.node,
                event_type = %message.event,
                "event for unknown node ignored"
            );
            return Err(TreeError::UnknownNode(message.node));
        };

        let event = DomEvent::from_message(message, node.is_enabled())?;
        if let Some(listeners) = node.listeners() {
            listeners.fire_event(&event);
        }
        Ok(())
    }

    /// Collect attach/detach and property changes since the last call
    ///
    /// Constants referenced by the changes are interned so that every id
    /// the client sees is resolvable from this or an earlier batch.
    pub fn collect_changes(&self) -> ChangeBatch {
        let mut changes = std::mem::take(&mut *self.pending.borrow_mut());

        let nodes: Vec<StateNode> = self.nodes.borrow().values().cloned().collect();
        for node in &nodes {
            node.collect_changes(&mut changes);
        }

        for change in &changes {
            if let NodeChange::Put { value, .. } = change {
                if let Some(key) = value.as_constant() {
                    self.pool.intern_key(key);
                }
            }
        }

        let batch = ChangeBatch {
            changes,
            constants: self.pool.dump_new_constants(),
        };
        debug!(
            changes = batch.changes.len(),
            constants = batch.constants.as_ref().map_or(0, |c| c.len()),
            "collected changes"
        );
        batch
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTree")
            .field("nodes", &self.nodes.borrow().len())
            .field("constants", &self.pool.len())
            .field("config", &self.config)
            .finish()
    }
}
