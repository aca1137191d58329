//! Workload resource - a job as tracked by the queueing subsystem
//!
//! The queueing subsystem creates one Workload per submitted job, one pod set
//! per replicated job. Once quota is reserved it writes an admission with a
//! topology assignment per pod set, and it waits for every admission check
//! listed on the workload to turn `Ready` before letting the job run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assignment::TopologyAssignment;
use super::job::PodTemplate;
use super::resources::ObjectMeta;

/// A Workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: WorkloadSpec,

    #[serde(default)]
    pub status: WorkloadStatus,
}

fn default_api_version() -> String {
    "kueue.x-k8s.io/v1beta1".to_string()
}

fn default_kind() -> String {
    "Workload".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    #[serde(default)]
    pub pod_sets: Vec<PodSet>,
}

/// Pods of one replicated job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSet {
    pub name: String,

    /// Total pods across all replicas
    pub count: u32,

    pub template: PodTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission: Option<Admission>,

    #[serde(default)]
    pub admission_checks: Vec<AdmissionCheckState>,

    /// Set once the job has completed
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    #[serde(default)]
    pub cluster_queue: String,

    #[serde(default)]
    pub pod_set_assignments: Vec<PodSetAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSetAssignment {
    pub name: String,

    #[serde(default)]
    pub count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_assignment: Option<TopologyAssignment>,
}

/// State of one admission check on a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CheckState {
    #[default]
    Pending,
    Ready,
    /// Evict and requeue the workload
    Retry,
    /// Give up on the workload
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionCheckState {
    pub name: String,

    #[serde(default)]
    pub state: CheckState,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl AdmissionCheckState {
    pub fn new(name: impl Into<String>, state: CheckState, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state,
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }

    /// Same state and message, ignoring timestamps
    pub fn same_as(&self, other: &AdmissionCheckState) -> bool {
        self.name == other.name && self.state == other.state && self.message == other.message
    }
}

impl Workload {
    pub fn new(metadata: ObjectMeta, pod_sets: Vec<PodSet>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec: WorkloadSpec { pod_sets },
            status: WorkloadStatus::default(),
        }
    }

    /// `namespace/name` key, used to serialize reconciles and index slices
    pub fn key(&self) -> String {
        self.metadata.qualified_name()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace_or_default()
    }

    /// Name of the job this workload was created for
    pub fn job_name(&self) -> &str {
        self.metadata
            .controller_owner()
            .map(|o| o.name.as_str())
            .unwrap_or(&self.metadata.name)
    }

    pub fn is_admitted(&self) -> bool {
        self.status.admission.is_some()
    }

    pub fn admission_check(&self, name: &str) -> Option<&AdmissionCheckState> {
        self.status.admission_checks.iter().find(|c| c.name == name)
    }

    pub fn pod_set_assignment(&self, pod_set: &str) -> Option<&PodSetAssignment> {
        self.status
            .admission
            .as_ref()?
            .pod_set_assignments
            .iter()
            .find(|a| a.name == pod_set)
    }

    /// Whether the admission places any pod on the node named `host`
    pub fn uses_host(&self, host: &str) -> bool {
        self.status.admission.as_ref().is_some_and(|admission| {
            admission
                .pod_set_assignments
                .iter()
                .filter_map(|a| a.topology_assignment.as_ref())
                .any(|ta| ta.places_on(host))
        })
    }

    /// Replace the named admission check state; returns false if the
    /// workload does not carry that check
    pub fn set_admission_check(&mut self, state: AdmissionCheckState) -> bool {
        match self
            .status
            .admission_checks
            .iter_mut()
            .find(|c| c.name == state.name)
        {
            Some(existing) => {
                if existing.state == state.state {
                    // Keep the original transition time
                    existing.message = state.message;
                } else {
                    *existing = state;
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::resources::OwnerReference;

    fn workload() -> Workload {
        let mut meta = ObjectMeta::namespaced("research", "jobset-train-abc12");
        meta.owner_references
            .push(OwnerReference::controller("jobset.x-k8s.io/v1alpha2", "JobSet", "train"));
        let mut wl = Workload::new(meta, vec![]);
        wl.status
            .admission_checks
            .push(AdmissionCheckState::new("tpu-slice", CheckState::Pending, ""));
        wl
    }

    #[test]
    fn test_keys() {
        let wl = workload();
        assert_eq!(wl.key(), "research/jobset-train-abc12");
        assert_eq!(wl.job_name(), "train");
        assert_eq!(wl.namespace(), "research");
        assert!(!wl.is_admitted());
    }

    #[test]
    fn test_job_name_falls_back_to_workload_name() {
        let wl = Workload::new(ObjectMeta::namespaced("ns", "plain"), vec![]);
        assert_eq!(wl.job_name(), "plain");
    }

    #[test]
    fn test_set_admission_check() {
        let mut wl = workload();
        let before = wl.admission_check("tpu-slice").unwrap().last_transition_time;

        assert!(wl.set_admission_check(AdmissionCheckState::new(
            "tpu-slice",
            CheckState::Pending,
            "1/2 slices ready"
        )));
        let check = wl.admission_check("tpu-slice").unwrap();
        assert_eq!(check.message, "1/2 slices ready");
        assert_eq!(check.last_transition_time, before);

        assert!(wl.set_admission_check(AdmissionCheckState::new(
            "tpu-slice",
            CheckState::Ready,
            ""
        )));
        assert_eq!(wl.admission_check("tpu-slice").unwrap().state, CheckState::Ready);

        assert!(!wl.set_admission_check(AdmissionCheckState::new(
            "other-check",
            CheckState::Ready,
            ""
        )));
    }

    #[test]
    fn test_same_as_ignores_time() {
        let a = AdmissionCheckState::new("c", CheckState::Ready, "m");
        let mut b = a.clone();
        b.last_transition_time = None;
        assert!(a.same_as(&b));
        b.message = "other".to_string();
        assert!(!a.same_as(&b));
    }
}
