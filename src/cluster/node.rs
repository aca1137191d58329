//! Node resource - a machine hosting accelerator chips
//!
//! Nodes are labelled by external systems with their accelerator type,
//! physical block and sub-block, partition ids and health. The controller
//! only ever reads them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::resources::ObjectMeta;
use crate::labels;

/// A Node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    /// Kind is always "Node"
    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Node".to_string()
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::named(name),
        }
    }

    /// Add a label (builder)
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    /// Whether the health agent has marked this node healthy
    pub fn is_healthy(&self) -> bool {
        self.label(labels::HEALTH_LABEL) == Some(labels::HEALTHY)
    }
}
