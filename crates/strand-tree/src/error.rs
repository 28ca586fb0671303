//! Tree errors

use crate::NodeId;

/// Errors reported by the state tree and its features
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Listener registration for '{event_type}' has been removed")]
    StaleRegistration { event_type: String },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("No node data of type {type_name}")]
    MissingNodeData { type_name: &'static str },

    #[error("Node data stored for {type_name} has a different type")]
    NodeDataTypeMismatch { type_name: &'static str },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        TreeError::MalformedMessage(err.to_string())
    }
}
