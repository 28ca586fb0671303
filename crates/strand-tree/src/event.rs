//! DOM Events
//!
//! Events sent by the client for a state node, as replayed on the server.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{NodeId, StateNode, TreeError};

/// Key in the event data carrying the debounce phase identifier
pub const EVENT_DATA_PHASE: &str = "for";

/// When during a burst of identical events a listener is notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DebouncePhase {
    /// First event of a burst
    Leading,
    /// Periodically while the burst continues
    Intermediate,
    /// After the burst has settled
    Trailing,
}

impl DebouncePhase {
    /// Identifier used on the wire
    pub fn identifier(self) -> &'static str {
        match self {
            DebouncePhase::Leading => "leading",
            DebouncePhase::Intermediate => "intermediate",
            DebouncePhase::Trailing => "trailing",
        }
    }

    pub fn for_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            "leading" => Some(DebouncePhase::Leading),
            "intermediate" => Some(DebouncePhase::Intermediate),
            "trailing" => Some(DebouncePhase::Trailing),
            _ => None,
        }
    }
}

/// Event fired for a state node
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    event_type: String,
    source: NodeId,
    source_enabled: bool,
    data: Option<Map<String, Value>>,
    phase: DebouncePhase,
}

/// Wire form of an event sent by the client
#[derive(Debug, Deserialize)]
pub(crate) struct EventMessage {
    pub node: NodeId,
    pub event: String,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

impl DomEvent {
    /// Create a leading-phase event for an enabled source
    pub fn new(
        source: NodeId,
        event_type: impl Into<String>,
        data: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source,
            source_enabled: true,
            data,
            phase: DebouncePhase::Leading,
        }
    }

    /// Create an event for `node`, capturing its current enabled state
    pub fn for_node(
        node: &StateNode,
        event_type: impl Into<String>,
        data: Option<Map<String, Value>>,
    ) -> Self {
        Self::new(node.id(), event_type, data).with_source_enabled(node.is_enabled())
    }

    /// Build an event from a client message, reading the phase from the data
    pub(crate) fn from_message(
        message: EventMessage,
        source_enabled: bool,
    ) -> Result<Self, TreeError> {
        let phase = extract_phase(message.data.as_ref())?;
        Ok(Self {
            event_type: message.event,
            source: message.node,
            source_enabled,
            data: message.data,
            phase,
        })
    }

    pub fn with_phase(mut self, phase: DebouncePhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_source_enabled(mut self, enabled: bool) -> Self {
        self.source_enabled = enabled;
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Whether the source element was enabled when the event arrived
    pub fn is_source_enabled(&self) -> bool {
        self.source_enabled
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    pub fn phase(&self) -> DebouncePhase {
        self.phase
    }
}

fn extract_phase(data: Option<&Map<String, Value>>) -> Result<DebouncePhase, TreeError> {
    let Some(value) = data.and_then(|d| d.get(EVENT_DATA_PHASE)) else {
        return Ok(DebouncePhase::Leading);
    };

    value
        .as_str()
        .and_then(DebouncePhase::for_identifier)
        .ok_or_else(|| TreeError::MalformedMessage(format!("unknown debounce phase: {value}")))
}
