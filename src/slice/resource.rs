//! Slice resource - one physical accelerator partition backing one replica
//!
//! A Slice is analogous to a cluster-scoped custom resource. Its spec is
//! written once by the reconciler; its status is written only by the hardware
//! health agent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::resources::{ObjectMeta, API_VERSION};
use crate::labels;
use crate::topology::AcceleratorType;

/// Condition type reporting whether the slice hardware is usable
pub const CONDITION_READY: &str = "Ready";

/// Condition type set when the slice could not be created at all
pub const CONDITION_CREATION_FAILED: &str = "CreationFailed";

/// Reason codes carried by the `Ready` condition
pub mod reason {
    pub const ACTIVE: &str = "Active";
    pub const ACTIVE_DEGRADED: &str = "ActiveDegraded";
    pub const ACTIVATING: &str = "Activating";
    pub const HARDWARE_FAILURE: &str = "HardwareFailure";
}

/// A Slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind is always "Slice"
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: SliceSpec,

    #[serde(default)]
    pub status: SliceStatus,
}

/// Desired hardware for a slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceSpec {
    pub accelerator_type: AcceleratorType,

    /// Requested shape, e.g. "4x4x8"
    pub topology: String,

    /// Required node predicate: every key must match one of its values
    #[serde(default)]
    pub node_selector: BTreeMap<String, Vec<String>>,
}

/// Observed state of a slice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceStatus {
    #[serde(default)]
    pub conditions: Vec<SliceCondition>,

    /// Physical block the slice landed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,

    /// Physical sub-blocks, in placement order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_block_ids: Vec<String>,
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A timestamped condition of a Slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    pub reason: String,

    #[serde(default)]
    pub message: String,

    pub last_transition_time: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatusError {
    #[error(
        "condition '{condition_type}' transition at {attempted} is older than the recorded {recorded}"
    )]
    Regression {
        condition_type: String,
        recorded: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },
}

impl Slice {
    pub fn new(metadata: ObjectMeta, spec: SliceSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: "Slice".to_string(),
            metadata,
            spec,
            status: SliceStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// `namespace/name` of the workload that owns this slice, if recorded
    pub fn owner_key(&self) -> Option<String> {
        let ns = self.metadata.annotations.get(labels::OWNER_WORKLOAD_NAMESPACE)?;
        let name = self.metadata.annotations.get(labels::OWNER_WORKLOAD_NAME)?;
        Some(format!("{}/{}", ns, name))
    }

    /// Whether this slice was derived from the same desired spec
    pub fn spec_matches(&self, other: &SliceSpec) -> bool {
        &self.spec == other
    }
}

impl SliceSpec {
    /// Whether a node with `labels` satisfies the selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.node_selector.iter().all(|(key, allowed)| {
            labels
                .get(key)
                .map(|value| allowed.iter().any(|a| a == value))
                .unwrap_or(false)
        })
    }
}

impl SliceStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&SliceCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Record a condition, replacing any earlier one of the same type.
    ///
    /// A condition older than the recorded one is rejected so transition
    /// times never move backwards.
    pub fn set_condition(&mut self, condition: SliceCondition) -> Result<(), StatusError> {
        if let Some(existing) = self.condition(&condition.condition_type) {
            if condition.last_transition_time < existing.last_transition_time {
                return Err(StatusError::Regression {
                    condition_type: condition.condition_type,
                    recorded: existing.last_transition_time,
                    attempted: condition.last_transition_time,
                });
            }
        }
        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
        Ok(())
    }
}

impl SliceCondition {
    /// A condition that transitions now
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.last_transition_time = time;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}
