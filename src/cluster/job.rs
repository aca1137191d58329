//! Job specifications as seen by the admission webhook
//!
//! A Job is a set of replicated jobs ("replica groups"), each running
//! `replicas` copies of a pod template with `parallelism` pods apiece. Only
//! the fields the slice machinery reads are typed; everything else is kept
//! verbatim in `extra` so a mutated object loses nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resources::ObjectMeta;
use crate::labels;

/// Untyped fields carried through unchanged
pub type Extra = BTreeMap<String, Value>;

/// A multi-replica training job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: JobSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub replicated_jobs: Vec<ReplicatedJob>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// A replica group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedJob {
    pub name: String,

    #[serde(default = "default_one")]
    pub replicas: u32,

    pub template: JobTemplate,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    #[serde(default)]
    pub spec: JobTemplateSpec,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTemplateSpec {
    /// Pods per replica; the orchestrator defaults this to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,

    #[serde(default)]
    pub template: PodTemplate,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Pod template: metadata plus pod spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub metadata: TemplateMeta,

    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default)]
    pub containers: Vec<Container>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Affinity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeAffinity>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAffinity {
    #[serde(
        rename = "requiredDuringSchedulingIgnoredDuringExecution",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub required: Option<NodeSelector>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default)]
    pub node_selector_terms: Vec<NodeSelectorTerm>,
}

/// Terms are ORed; expressions within a term are ANDed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorTerm {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<NodeSelectorRequirement>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Value>,
}

fn default_one() -> u32 {
    1
}

/// Read a quantity that may be serialized as a number or a string
fn quantity(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Job {
    pub fn has_queue_label(&self) -> bool {
        self.metadata.labels.contains_key(labels::QUEUE_NAME_LABEL)
    }
}

impl JobTemplateSpec {
    pub fn parallelism(&self) -> u32 {
        self.parallelism.unwrap_or(1)
    }
}

impl PodTemplate {
    pub fn topology_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(labels::TOPOLOGY_ANNOTATION)
            .map(String::as_str)
    }

    pub fn accelerator_selector(&self) -> Option<&str> {
        self.spec
            .node_selector
            .get(labels::ACCELERATOR_SELECTOR)
            .map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Accelerator chips requested by one pod.
    ///
    /// Limits win over requests, per container, summed over containers.
    pub fn chips_per_pod(&self) -> u64 {
        self.spec
            .containers
            .iter()
            .filter_map(|c| {
                c.resources
                    .limits
                    .get(labels::TPU_RESOURCE)
                    .or_else(|| c.resources.requests.get(labels::TPU_RESOURCE))
                    .and_then(quantity)
                    .map(u64::from)
            })
            .sum()
    }

    /// Whether the pod already constrains `key`, via selector or required affinity
    pub fn constrains_node_label(&self, key: &str) -> bool {
        if self.spec.node_selector.contains_key(key) {
            return true;
        }
        self.spec
            .affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|na| na.required.as_ref())
            .map(|sel| {
                sel.node_selector_terms
                    .iter()
                    .flat_map(|t| t.match_expressions.iter())
                    .any(|e| e.key == key)
            })
            .unwrap_or(false)
    }

    /// AND `requirement` into every required node-affinity term
    pub fn require_node_label(&mut self, requirement: NodeSelectorRequirement) {
        let affinity = self.spec.affinity.get_or_insert_with(Affinity::default);
        let node_affinity = affinity.node_affinity.get_or_insert_with(NodeAffinity::default);
        let required = node_affinity.required.get_or_insert_with(NodeSelector::default);

        if required.node_selector_terms.is_empty() {
            required.node_selector_terms.push(NodeSelectorTerm::default());
        }
        for term in &mut required.node_selector_terms {
            term.match_expressions.push(requirement.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB_YAML: &str = r#"
apiVersion: jobset.x-k8s.io/v1alpha2
kind: JobSet
metadata:
  name: train
  namespace: research
  labels:
    kueue.x-k8s.io/queue-name: tpu-queue
spec:
  failurePolicy:
    maxRestarts: 3
  replicatedJobs:
    - name: workers
      replicas: 2
      template:
        spec:
          parallelism: 16
          completions: 16
          template:
            metadata:
              annotations:
                cloud.google.com/gke-tpu-topology: 4x4x4
            spec:
              nodeSelector:
                cloud.google.com/gke-tpu-accelerator: tpu-v7x
              containers:
                - name: trainer
                  image: trainer:latest
                  resources:
                    limits:
                      google.com/tpu: "4"
"#;

    fn job() -> Job {
        serde_yaml::from_str(JOB_YAML).unwrap()
    }

    #[test]
    fn test_parse_job() {
        let job = job();
        assert!(job.has_queue_label());
        let rj = &job.spec.replicated_jobs[0];
        assert_eq!(rj.replicas, 2);
        assert_eq!(rj.template.spec.parallelism(), 16);

        let pod = &rj.template.spec.template;
        assert_eq!(pod.topology_annotation(), Some("4x4x4"));
        assert_eq!(pod.accelerator_selector(), Some("tpu-v7x"));
        assert_eq!(pod.chips_per_pod(), 4);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let value = serde_json::to_value(job()).unwrap();
        assert_eq!(value["spec"]["failurePolicy"]["maxRestarts"], 3);
        assert_eq!(
            value["spec"]["replicatedJobs"][0]["template"]["spec"]["completions"],
            16
        );
        assert_eq!(
            value["spec"]["replicatedJobs"][0]["template"]["spec"]["template"]["spec"]
                ["containers"][0]["image"],
            "trainer:latest"
        );
    }

    #[test]
    fn test_chips_numeric_quantity_and_requests() {
        let mut pod = PodTemplate::default();
        let mut limits = BTreeMap::new();
        limits.insert(labels::TPU_RESOURCE.to_string(), Value::from(2));
        let mut requests = BTreeMap::new();
        requests.insert(labels::TPU_RESOURCE.to_string(), Value::from("4"));
        pod.spec.containers.push(Container {
            name: "a".to_string(),
            resources: ResourceRequirements {
                limits,
                requests: BTreeMap::new(),
            },
            extra: Extra::new(),
        });
        pod.spec.containers.push(Container {
            name: "b".to_string(),
            resources: ResourceRequirements {
                limits: BTreeMap::new(),
                requests,
            },
            extra: Extra::new(),
        });
        assert_eq!(pod.chips_per_pod(), 6);
    }

    #[test]
    fn test_chips_sum_past_u32() {
        let mut pod = PodTemplate::default();
        for name in ["a", "b"] {
            let mut limits = BTreeMap::new();
            limits.insert(labels::TPU_RESOURCE.to_string(), Value::from(u32::MAX));
            pod.spec.containers.push(Container {
                name: name.to_string(),
                resources: ResourceRequirements {
                    limits,
                    requests: BTreeMap::new(),
                },
                extra: Extra::new(),
            });
        }
        assert_eq!(pod.chips_per_pod(), 2 * u64::from(u32::MAX));
    }

    #[test]
    fn test_constrains_node_label() {
        let mut pod = PodTemplate::default();
        assert!(!pod.constrains_node_label(labels::HEALTH_LABEL));

        pod.spec
            .node_selector
            .insert(labels::HEALTH_LABEL.to_string(), "degraded".to_string());
        assert!(pod.constrains_node_label(labels::HEALTH_LABEL));

        let mut pod = PodTemplate::default();
        pod.require_node_label(NodeSelectorRequirement {
            key: labels::HEALTH_LABEL.to_string(),
            operator: "NotIn".to_string(),
            values: vec!["unhealthy".to_string()],
        });
        assert!(pod.constrains_node_label(labels::HEALTH_LABEL));
    }

    #[test]
    fn test_require_node_label_ands_into_every_term() {
        let mut pod = PodTemplate::default();
        pod.spec.affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required: Some(NodeSelector {
                    node_selector_terms: vec![
                        NodeSelectorTerm::default(),
                        NodeSelectorTerm::default(),
                    ],
                }),
                extra: Extra::new(),
            }),
            extra: Extra::new(),
        });

        pod.require_node_label(NodeSelectorRequirement {
            key: "k".to_string(),
            operator: "In".to_string(),
            values: vec!["v".to_string()],
        });

        let terms = &pod
            .spec
            .affinity
            .unwrap()
            .node_affinity
            .unwrap()
            .required
            .unwrap()
            .node_selector_terms;
        assert!(terms.iter().all(|t| t.match_expressions.len() == 1));
    }
}
