//! Outbound changes
//!
//! Changes collected from the tree and sent to the client together with the
//! constants interned since the previous batch.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{NodeId, PropertyValue};

/// One change to the client-side copy of the tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeChange {
    Attach {
        node: NodeId,
    },
    Detach {
        node: NodeId,
    },
    Put {
        node: NodeId,
        feat: u8,
        key: String,
        value: PropertyValue,
    },
    Remove {
        node: NodeId,
        feat: u8,
        key: String,
    },
}

impl NodeChange {
    pub fn node(&self) -> NodeId {
        match self {
            NodeChange::Attach { node }
            | NodeChange::Detach { node }
            | NodeChange::Put { node, .. }
            | NodeChange::Remove { node, .. } => *node,
        }
    }
}

/// Changes plus newly interned constants
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeBatch {
    pub changes: Vec<NodeChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constants: Option<Map<String, Value>>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.constants.is_none()
    }

    pub fn to_json(&self) -> Value {
        // Serializing plain data with string keys cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
