//! Control Plane API Server
//!
//! Provides REST endpoints over the declarative store:
//! - Slices: list, get, delete, condition and placement reports
//! - Workloads: upsert (as the queueing subsystem), list, get, delete
//! - Nodes: register, list, get, remove
//! - Webhook: `POST /mutate` answers AdmissionReviews
//! - Status: cluster health
//!
//! Writes land in the store, which publishes the affected workload key; the
//! orchestrator picks that up and reconciles.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    node::Node,
    resources::{OperationStatus, ResourceList},
    store::{ClusterStats, ClusterStore, StoreError},
    workload::Workload,
};
use crate::slice::{derive_state, Slice, SliceCondition, SliceState, DEFAULT_STALENESS_TIMEOUT};
use crate::webhook::{mutate, AdmissionReview};

/// Shared state for the control plane API
#[derive(Clone)]
pub struct ControlPlaneState {
    pub store: ClusterStore,
    pub staleness_timeout: Duration,
}

impl ControlPlaneState {
    pub fn new(store: ClusterStore) -> Self {
        Self {
            store,
            staleness_timeout: DEFAULT_STALENESS_TIMEOUT,
        }
    }

    pub fn with_staleness_timeout(mut self, timeout: Duration) -> Self {
        self.staleness_timeout = timeout;
        self
    }
}

impl Default for ControlPlaneState {
    fn default() -> Self {
        Self::new(ClusterStore::new())
    }
}

/// Create the control plane router
pub fn create_control_plane_router(state: ControlPlaneState) -> Router {
    Router::new()
        // Cluster status
        .route("/v1/status", get(cluster_status))
        // Slices
        .route("/v1/slices", get(list_slices))
        .route("/v1/slices/{name}", get(get_slice).delete(delete_slice))
        .route("/v1/slices/{name}/conditions", put(report_condition))
        .route("/v1/slices/{name}/placement", put(report_placement))
        // Workloads
        .route("/v1/workloads", get(list_workloads).put(upsert_workload))
        .route(
            "/v1/namespaces/{namespace}/workloads/{name}",
            get(get_workload).delete(delete_workload),
        )
        .route(
            "/v1/namespaces/{namespace}/workloads/{name}/slices",
            get(workload_slices),
        )
        // Nodes
        .route("/v1/nodes", get(list_nodes).post(register_node))
        .route("/v1/nodes/{name}", get(get_node).delete(remove_node))
        // Admission webhook
        .route("/mutate", post(mutate_job))
        // Health check
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn store_error_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(..) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(..)
        | StoreError::Immutable(_)
        | StoreError::OwnedElsewhere { .. }
        | StoreError::Status(_) => StatusCode::CONFLICT,
        StoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ============================================================================
// Health & Status
// ============================================================================

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn cluster_status(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let stats = state.store.stats(state.staleness_timeout);
    Json(ClusterStatusResponse {
        status: "ok".to_string(),
        stats,
    })
}

#[derive(Serialize)]
struct ClusterStatusResponse {
    status: String,
    stats: ClusterStats,
}

// ============================================================================
// Slice Endpoints
// ============================================================================

/// A slice with its derived lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceView {
    pub name: String,
    pub state: SliceState,
    pub slice: Slice,
}

impl SliceView {
    fn new(slice: Slice, timeout: Duration) -> Self {
        Self {
            name: slice.metadata.name.clone(),
            state: derive_state(&slice, Utc::now(), timeout),
            slice,
        }
    }
}

async fn list_slices(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let views: Vec<SliceView> = state
        .store
        .slices()
        .into_iter()
        .map(|s| SliceView::new(s, state.staleness_timeout))
        .collect();
    Json(ResourceList::new("SliceList", views))
}

async fn get_slice(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_slice(&name) {
        Some(slice) => (
            StatusCode::OK,
            Json(Some(SliceView::new(slice, state.staleness_timeout))),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json::<Option<SliceView>>(None)).into_response(),
    }
}

async fn delete_slice(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.remove_slice(&name) {
        Ok(_) => (StatusCode::OK, Json(OperationStatus::success("Slice deleted"))),
        Err(e) => (
            store_error_status(&e),
            Json(OperationStatus::failure(e.to_string())),
        ),
    }
}

async fn report_condition(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
    Json(condition): Json<SliceCondition>,
) -> impl IntoResponse {
    let condition_type = condition.condition_type.clone();
    match state.store.set_slice_condition(&name, condition) {
        Ok(slice) => {
            let view = SliceView::new(slice, state.staleness_timeout);
            info!(slice = %name, condition = %condition_type, state = %view.state, "condition reported");
            (StatusCode::OK, Json(SliceResponse::success(view)))
        }
        Err(e) => {
            warn!(slice = %name, "condition rejected: {}", e);
            (store_error_status(&e), Json(SliceResponse::error(e.to_string())))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlacementRequest {
    #[serde(default)]
    block_id: Option<String>,
    #[serde(default)]
    sub_block_ids: Vec<String>,
}

async fn report_placement(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
    Json(req): Json<PlacementRequest>,
) -> impl IntoResponse {
    match state
        .store
        .set_slice_placement(&name, req.block_id, req.sub_block_ids)
    {
        Ok(slice) => (
            StatusCode::OK,
            Json(SliceResponse::success(SliceView::new(
                slice,
                state.staleness_timeout,
            ))),
        ),
        Err(e) => (store_error_status(&e), Json(SliceResponse::error(e.to_string()))),
    }
}

#[derive(Serialize)]
struct SliceResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    slice: Option<SliceView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SliceResponse {
    fn success(slice: SliceView) -> Self {
        Self {
            success: true,
            slice: Some(slice),
            error: None,
        }
    }

    fn error(msg: String) -> Self {
        Self {
            success: false,
            slice: None,
            error: Some(msg),
        }
    }
}

// ============================================================================
// Workload Endpoints
// ============================================================================

async fn list_workloads(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(ResourceList::new("WorkloadList", state.store.workloads()))
}

async fn upsert_workload(
    State(state): State<ControlPlaneState>,
    Json(workload): Json<Workload>,
) -> impl IntoResponse {
    let stored = state.store.upsert_workload(workload);
    info!(workload = %stored.key(), admitted = stored.is_admitted(), "workload stored");
    (StatusCode::OK, Json(stored))
}

async fn get_workload(
    State(state): State<ControlPlaneState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = format!("{}/{}", namespace, name);
    match state.store.get_workload_sync(&key) {
        Some(workload) => (StatusCode::OK, Json(Some(workload))).into_response(),
        None => (StatusCode::NOT_FOUND, Json::<Option<Workload>>(None)).into_response(),
    }
}

async fn delete_workload(
    State(state): State<ControlPlaneState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = format!("{}/{}", namespace, name);
    match state.store.remove_workload(&key) {
        Ok(_) => (
            StatusCode::OK,
            Json(OperationStatus::success("Workload deleted")),
        ),
        Err(e) => (
            store_error_status(&e),
            Json(OperationStatus::failure(e.to_string())),
        ),
    }
}

async fn workload_slices(
    State(state): State<ControlPlaneState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = format!("{}/{}", namespace, name);
    let views: Vec<SliceView> = state
        .store
        .owned_slices(&key)
        .into_iter()
        .map(|s| SliceView::new(s, state.staleness_timeout))
        .collect();
    Json(ResourceList::new("SliceList", views))
}

// ============================================================================
// Node Endpoints
// ============================================================================

async fn list_nodes(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(ResourceList::new("NodeList", state.store.nodes()))
}

async fn register_node(
    State(state): State<ControlPlaneState>,
    Json(node): Json<Node>,
) -> impl IntoResponse {
    let name = node.metadata.name.clone();
    state.store.upsert_node(node);
    (
        StatusCode::CREATED,
        Json(OperationStatus::success(format!("Node {} registered", name))),
    )
}

async fn get_node(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_node(&name) {
        Some(node) => (StatusCode::OK, Json(Some(node))).into_response(),
        None => (StatusCode::NOT_FOUND, Json::<Option<Node>>(None)).into_response(),
    }
}

async fn remove_node(
    State(state): State<ControlPlaneState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.remove_node(&name) {
        Ok(_) => (
            StatusCode::OK,
            Json(OperationStatus::success("Node removed")),
        ),
        Err(e) => (
            store_error_status(&e),
            Json(OperationStatus::failure(e.to_string())),
        ),
    }
}

// ============================================================================
// Admission Webhook
// ============================================================================

async fn mutate_job(Json(review): Json<AdmissionReview>) -> impl IntoResponse {
    Json(mutate(review))
}
