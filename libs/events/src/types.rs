//! Event type and reason definitions.

use serde::{Deserialize, Serialize};

// =============================================================================
// Event Reasons
// =============================================================================

/// All event reasons as constants.
///
/// Reasons are short CamelCase machine-readable strings; the message carries
/// the human-readable detail.
pub mod reasons {
    // Child lifecycle
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const DELETED: &str = "Deleted";
    pub const RECREATING: &str = "Recreating";

    // Child failures
    pub const CREATE_FAILED: &str = "CreateFailed";
    pub const UPDATE_FAILED: &str = "UpdateFailed";
    pub const DELETE_FAILED: &str = "DeleteFailed";
    pub const NOT_OWNED: &str = "ErrResourceExists";

    // Parent
    pub const SYNCED: &str = "Synced";
    pub const SYNC_FAILED: &str = "SyncFailed";
    pub const STATUS_UPDATE_FAILED: &str = "StatusUpdateFailed";
    pub const INVALID_SPEC: &str = "InvalidSpec";

    // Routing
    pub const DEPENDENCY_UNRESOLVED: &str = "DependencyUnresolved";
}

// =============================================================================
// Event Type
// =============================================================================

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventType {
    /// Something expected happened.
    #[default]
    Normal,
    /// Something failed or needs attention.
    Warning,
}

impl EventType {
    /// The string form used by the cluster event API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
