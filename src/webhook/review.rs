//! AdmissionReview envelope (`admission.k8s.io/v1`)
//!
//! The API server posts an AdmissionReview carrying the job; we answer with
//! the same envelope holding a response. A mutation is returned as a base64
//! JSONPatch that replaces the whole `/spec`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{default_job, WebhookError};
use crate::cluster::job::Job;

const API_VERSION: &str = "admission.k8s.io/v1";
const KIND: &str = "AdmissionReview";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,

    #[serde(default)]
    pub operation: String,

    #[serde(default)]
    pub object: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,

    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStatus {
    pub code: u16,
    pub message: String,
}

impl AdmissionResponse {
    fn allow(uid: String) -> Self {
        Self {
            uid,
            allowed: true,
            status: None,
            patch: None,
            patch_type: None,
        }
    }

    fn deny(uid: String, error: &WebhookError) -> Self {
        Self {
            uid,
            allowed: false,
            status: Some(AdmissionStatus {
                code: error.code(),
                message: error.to_string(),
            }),
            patch: None,
            patch_type: None,
        }
    }

    /// Decoded JSONPatch, if the response carries one
    pub fn decoded_patch(&self) -> Option<Value> {
        let bytes = STANDARD.decode(self.patch.as_ref()?).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Answer an AdmissionReview for a job
pub fn mutate(review: AdmissionReview) -> AdmissionReview {
    let response = match review.request {
        Some(request) => respond(request),
        None => {
            warn!("admission review without a request");
            AdmissionResponse::deny(
                String::new(),
                &WebhookError::InvalidRequest("missing request".to_string()),
            )
        }
    };

    AdmissionReview {
        api_version: review.api_version,
        kind: review.kind,
        request: None,
        response: Some(response),
    }
}

fn respond(request: AdmissionRequest) -> AdmissionResponse {
    let uid = request.uid;
    let job: Job = match serde_json::from_value(request.object) {
        Ok(job) => job,
        Err(e) => {
            return AdmissionResponse::deny(uid, &WebhookError::InvalidRequest(e.to_string()));
        }
    };
    let name = job.metadata.qualified_name();

    let defaulted = match default_job(job.clone()) {
        Ok(defaulted) => defaulted,
        Err(e) => {
            info!(job = %name, "rejected: {}", e);
            return AdmissionResponse::deny(uid, &e);
        }
    };

    if defaulted == job {
        debug!(job = %name, "admitted unchanged");
        return AdmissionResponse::allow(uid);
    }

    let spec = match serde_json::to_value(&defaulted.spec) {
        Ok(spec) => spec,
        Err(e) => {
            return AdmissionResponse::deny(uid, &WebhookError::InvalidRequest(e.to_string()));
        }
    };
    let patch = json!([{ "op": "replace", "path": "/spec", "value": spec }]);

    debug!(job = %name, "admitted with patch");
    AdmissionResponse {
        patch: Some(STANDARD.encode(patch.to_string())),
        patch_type: Some("JSONPatch".to_string()),
        ..AdmissionResponse::allow(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;

    fn review(object: Value) -> AdmissionReview {
        AdmissionReview {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            request: Some(AdmissionRequest {
                uid: "req-1".to_string(),
                operation: "CREATE".to_string(),
                object,
            }),
            response: None,
        }
    }

    fn jobset(topology: &str, parallelism: u32, chips: u32) -> Value {
        json!({
            "apiVersion": "jobset.x-k8s.io/v1alpha2",
            "kind": "JobSet",
            "metadata": {
                "name": "train",
                "namespace": "research",
                "labels": { (labels::QUEUE_NAME_LABEL): "tpu-queue" }
            },
            "spec": {
                "replicatedJobs": [{
                    "name": "workers",
                    "replicas": 1,
                    "template": { "spec": {
                        "parallelism": parallelism,
                        "template": {
                            "metadata": { "annotations": { (labels::TOPOLOGY_ANNOTATION): topology } },
                            "spec": {
                                "nodeSelector": { (labels::ACCELERATOR_SELECTOR): "tpu-v7x" },
                                "containers": [{
                                    "name": "trainer",
                                    "resources": { "limits": { (labels::TPU_RESOURCE): chips } }
                                }]
                            }
                        }
                    }}
                }]
            }
        })
    }

    #[test]
    fn test_mutation_returns_spec_patch() {
        let out = mutate(review(jobset("4x4x12", 48, 4)));
        let response = out.response.unwrap();
        assert!(response.allowed);
        assert_eq!(response.uid, "req-1");
        assert_eq!(response.patch_type.as_deref(), Some("JSONPatch"));

        let patch = response.decoded_patch().unwrap();
        assert_eq!(patch[0]["op"], "replace");
        assert_eq!(patch[0]["path"], "/spec");
        let annotations =
            &patch[0]["value"]["replicatedJobs"][0]["template"]["spec"]["template"]["metadata"]
                ["annotations"];
        assert_eq!(annotations[labels::PODSET_SLICE_SIZE], "16");
    }

    #[test]
    fn test_rejection_is_forbidden() {
        let out = mutate(review(jobset("4x4x4", 16, 1)));
        let response = out.response.unwrap();
        assert!(!response.allowed);
        let status = response.status.unwrap();
        assert_eq!(status.code, 403);
        assert!(status.message.contains("workers"));
        assert!(response.patch.is_none());
    }

    #[test]
    fn test_unchanged_job_has_no_patch() {
        let mut object = jobset("4x4x4", 16, 4);
        object["metadata"]["labels"] = json!({});
        let response = mutate(review(object)).response.unwrap();
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[test]
    fn test_malformed_request() {
        let response = mutate(review(json!({ "kind": "JobSet" }))).response.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.status.unwrap().code, 400);

        let empty = AdmissionReview {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            request: None,
            response: None,
        };
        let response = mutate(empty).response.unwrap();
        assert_eq!(response.status.unwrap().code, 400);
    }
}
