//! Parent status.
//!
//! Status is the only state the controller persists. Optional fields
//! round-trip exactly: absent on read is `None` or empty, and `None` or
//! empty is never written.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition types maintained by the orchestrator.
pub mod condition_types {
    /// Every child kind reconciled successfully in the latest pass.
    pub const SYNCED: &str = "Synced";
    /// The parent's workloads are serving.
    pub const READY: &str = "Ready";
}

/// Aggregate readiness of a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregateState {
    #[default]
    Unknown,
    Ready,
    NotReady,
}

impl AggregateState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// `Ready` if `ready`, `NotReady` otherwise.
    pub fn from_ready(ready: bool) -> Self {
        if ready {
            Self::Ready
        } else {
            Self::NotReady
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time `status` changed.
    #[serde(
        default,
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Status of any parent kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentStatus {
    /// Generation of the last fully successful pass.
    #[serde(default)]
    pub observed_generation: i64,

    /// Child bookkeeping key -> last synced child generation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub generations: BTreeMap<String, i64>,

    #[serde(default)]
    pub status: AggregateState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i64>,

    /// Readiness of a Knative-served component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_ready: Option<bool>,

    /// Cluster ingress host of a gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_status: Option<AggregateState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_component_count: Option<i64>,

    /// Component template name -> readiness.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub component_statuses: BTreeMap<String, AggregateState>,
}

impl ParentStatus {
    /// Insert or replace a condition, keeping the position of an existing one.
    /// The transition time only moves when the condition status flips.
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: Option<&str>,
        message: Option<String>,
    ) {
        let existing = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type);
        let last_transition_time = match &existing {
            Some(c) if c.status == status => c.last_transition_time,
            _ => Some(Utc::now()),
        };
        let condition = Condition {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.map(str::to_string),
            message,
            last_transition_time,
        };
        match existing {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}
