//! Admission webhook served over a real socket

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use tpuslice::cluster::{create_control_plane_router, ControlPlaneState};
use tpuslice::labels;

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_control_plane_router(ControlPlaneState::default());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn review(topology: &str, parallelism: u32, chips: u32, health_selector: bool) -> Value {
    let mut node_selector = json!({ (labels::ACCELERATOR_SELECTOR): "tpu-v7x" });
    if health_selector {
        node_selector[labels::HEALTH_LABEL] = json!("any");
    }
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "0b7c9c1e-4f6e-4d0b-9a2e-1c0f0e6a9d11",
            "operation": "CREATE",
            "object": {
                "apiVersion": "jobset.x-k8s.io/v1alpha2",
                "kind": "JobSet",
                "metadata": {
                    "name": "train",
                    "namespace": "research",
                    "labels": { (labels::QUEUE_NAME_LABEL): "tpu-queue" }
                },
                "spec": {
                    "suspend": true,
                    "replicatedJobs": [{
                        "name": "workers",
                        "replicas": 2,
                        "template": { "spec": {
                            "parallelism": parallelism,
                            "completions": parallelism,
                            "template": {
                                "metadata": { "annotations": { (labels::TOPOLOGY_ANNOTATION): topology } },
                                "spec": {
                                    "nodeSelector": node_selector,
                                    "containers": [{
                                        "name": "trainer",
                                        "image": "trainer:latest",
                                        "resources": { "limits": { (labels::TPU_RESOURCE): chips } }
                                    }]
                                }
                            }
                        }}
                    }]
                }
            }
        }
    })
}

async fn post(base: &str, body: &Value) -> Value {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/mutate", base))
        .json(body)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    resp.json().await.unwrap()
}

fn decode_patch(response: &Value) -> Value {
    let encoded = response["response"]["patch"].as_str().unwrap();
    serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
}

#[tokio::test]
async fn test_full_cube_job_is_patched() {
    let base = spawn_server().await;
    let out = post(&base, &review("4x4x12", 48, 4, false)).await;

    assert_eq!(out["kind"], "AdmissionReview");
    assert_eq!(out["response"]["allowed"], true);
    assert_eq!(out["response"]["uid"], "0b7c9c1e-4f6e-4d0b-9a2e-1c0f0e6a9d11");
    assert_eq!(out["response"]["patchType"], "JSONPatch");

    let patch = decode_patch(&out);
    let spec = &patch[0]["value"];
    assert_eq!(spec["suspend"], true);

    let template = &spec["replicatedJobs"][0]["template"]["spec"]["template"];
    let annotations = &template["metadata"]["annotations"];
    assert_eq!(annotations[labels::PODSET_SLICE_SIZE], "16");
    assert_eq!(annotations[labels::PODSET_REQUIRED_TOPOLOGY], labels::BLOCK_LABEL);
    assert_eq!(
        annotations[labels::PODSET_SLICE_REQUIRED_TOPOLOGY],
        labels::SUB_BLOCK_LABEL
    );

    let expr = &template["spec"]["affinity"]["nodeAffinity"]
        ["requiredDuringSchedulingIgnoredDuringExecution"]["nodeSelectorTerms"][0]
        ["matchExpressions"][0];
    assert_eq!(expr["key"], labels::HEALTH_LABEL);
    assert_eq!(expr["operator"], "In");
    assert_eq!(expr["values"], json!([labels::HEALTHY]));
    assert_eq!(template["spec"]["containers"][0]["image"], "trainer:latest");
}

#[tokio::test]
async fn test_partial_cube_job_is_rejected() {
    let base = spawn_server().await;
    let out = post(&base, &review("4x4x4", 16, 1, false)).await;

    assert_eq!(out["response"]["allowed"], false);
    assert_eq!(out["response"]["status"]["code"], 403);
    let message = out["response"]["status"]["message"].as_str().unwrap();
    assert!(message.contains("workers"));
    assert!(message.contains("16"));
    assert!(message.contains("64"));
}

#[tokio::test]
async fn test_caller_health_selector_is_respected() {
    let base = spawn_server().await;
    let out = post(&base, &review("4x4x4", 16, 4, true)).await;

    let patch = decode_patch(&out);
    let pod_spec = &patch[0]["value"]["replicatedJobs"][0]["template"]["spec"]["template"]["spec"];
    assert_eq!(pod_spec["nodeSelector"][labels::HEALTH_LABEL], "any");
    assert!(pod_spec.get("affinity").map(Value::is_null).unwrap_or(true));
}
