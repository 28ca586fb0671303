//! Strand Tree - server-side UI state
//!
//! A tree of state nodes, each carrying feature maps of reactive properties.
//! The element listener feature tracks DOM event subscriptions, compiles the
//! client-side filter/debounce rules for every event type, and replays events
//! sent back by the client to the matching server-side listeners.
//!
//! ```rust,ignore
//! use strand_tree::{StateTree, FeatureKind};
//!
//! let tree = StateTree::new();
//! let node = tree.create_node(&[FeatureKind::ElementListeners]);
//! let listeners = node.listeners().unwrap();
//! listeners.add("click", |event| println!("clicked {:?}", event.data()))?
//!     .set_filter(Some("event.button == 0"))?;
//! let batch = tree.collect_changes();
//! ```

mod change;
mod config;
mod constant_pool;
mod error;
mod event;
mod listener_map;
mod node;
mod node_map;
mod property;
mod tree;

pub use change::{ChangeBatch, NodeChange};
pub use config::TreeConfig;
pub use constant_pool::{ConstantPool, ConstantPoolKey};
pub use error::TreeError;
pub use event::{DebouncePhase, DomEvent, EVENT_DATA_PHASE};
pub use listener_map::{
    ALWAYS_TRUE_FILTER, DisabledUpdateMode, DomListenerRegistration, ElementListenerMap,
};
pub use node::{Feature, StateNode};
pub use node_map::{MapPropertyAddEvent, NodeMap};
pub use property::{MapProperty, MapPropertyChangeEvent, PropertyValue};
pub use tree::StateTree;

pub use strand_reactive as reactive;

use serde::{Deserialize, Serialize};

/// State node identifier, unique within one tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Root node ID
    pub const ROOT: NodeId = NodeId(1);
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of feature map attached to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKind {
    /// Tag and other element-level data
    ElementData,
    /// DOM properties
    ElementProperties,
    /// DOM attributes
    ElementAttributes,
    /// DOM event listeners
    ElementListeners,
}

impl FeatureKind {
    /// Wire id of the feature
    pub fn id(self) -> u8 {
        match self {
            FeatureKind::ElementData => 0,
            FeatureKind::ElementProperties => 1,
            FeatureKind::ElementAttributes => 2,
            FeatureKind::ElementListeners => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(FeatureKind::ElementData),
            1 => Some(FeatureKind::ElementProperties),
            2 => Some(FeatureKind::ElementAttributes),
            3 => Some(FeatureKind::ElementListeners),
            _ => None,
        }
    }
}
