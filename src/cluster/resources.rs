//! Shared resource types for the slice control plane

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// API version stamped on every resource this crate owns
pub const API_VERSION: &str = "slice.tpu.dev/v1alpha1";

/// Object metadata, shaped like the orchestrator's
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name, unique within the namespace (or cluster for cluster-scoped kinds)
    pub name: String,

    /// Namespace; `None` for cluster-scoped resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Unique identifier (generated)
    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Creation timestamp, set by the store when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Deletion marker; a resource carrying it is being torn down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped object
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            uid: Uuid::new_v4(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: Vec::new(),
            creation_timestamp: None,
            deletion_timestamp: None,
        }
    }

    /// Metadata for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let mut meta = Self::named(name);
        meta.namespace = Some(namespace.into());
        meta
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }

    /// `namespace/name` key used for indexing
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace_or_default(), self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// The controlling owner, if any
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }
}

/// Reference from an object to the object that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    pub fn controller(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            controller: true,
        }
    }
}

/// Response for listing resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind (e.g., "SliceList", "NodeList")
    pub kind: String,

    pub items: Vec<T>,
}

impl<T> ResourceList<T> {
    pub fn new(kind: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.into(),
            items,
        }
    }
}

/// Status of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub success: bool,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl OperationStatus {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        let meta = ObjectMeta::namespaced("team-a", "train");
        assert_eq!(meta.qualified_name(), "team-a/train");

        let cluster_scoped = ObjectMeta::named("node-1");
        assert_eq!(cluster_scoped.qualified_name(), "default/node-1");
    }

    #[test]
    fn test_metadata_defaults_on_deserialize() {
        let meta: ObjectMeta = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(meta.namespace.is_none());
        assert!(meta.labels.is_empty());
        assert!(!meta.is_deleting());
    }

    #[test]
    fn test_metadata_camel_case() {
        let mut meta = ObjectMeta::named("s");
        meta.deletion_timestamp = Some(Utc::now());
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("deletionTimestamp").is_some());
    }

    #[test]
    fn test_controller_owner() {
        let mut meta = ObjectMeta::namespaced("ns", "wl");
        assert!(meta.controller_owner().is_none());

        meta.owner_references.push(OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "cm".to_string(),
            controller: false,
        });
        meta.owner_references
            .push(OwnerReference::controller("jobset.x-k8s.io/v1alpha2", "JobSet", "train"));
        assert_eq!(meta.controller_owner().unwrap().name, "train");
    }

    #[test]
    fn test_resource_list() {
        let list: ResourceList<String> =
            ResourceList::new("StringList", vec!["a".into(), "b".into()]);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.api_version, API_VERSION);
    }

    #[test]
    fn test_operation_status() {
        assert!(OperationStatus::success("Slice deleted").success);
        assert!(!OperationStatus::failure("Slice not found").success);
    }
}
