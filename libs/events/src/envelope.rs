//! Event envelope: the object an event is about plus what happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EventType;

/// Reference to the object an event is regarding.
///
/// Events are always attached to the parent instance being reconciled; the
/// child that was acted upon is named in the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// API version of the object (e.g. `mesh.cellery.io/v1alpha2`).
    pub api_version: String,

    /// Kind of the object (e.g. `Cell`).
    pub kind: String,

    /// Namespace of the object.
    pub namespace: String,

    /// Name of the object.
    pub name: String,

    /// Server-assigned UID, empty if unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A single human-readable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Severity.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Short machine-readable reason (see [`crate::reasons`]).
    pub reason: String,

    /// Human-readable message.
    pub message: String,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Creates a `Normal` event.
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventType::Normal, reason, message)
    }

    /// Creates a `Warning` event.
    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventType::Warning, reason, message)
    }

    fn new(event_type: EventType, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type,
            reason: reason.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Returns true for warning events.
    pub fn is_warning(&self) -> bool {
        matches!(self.event_type, EventType::Warning)
    }
}
