//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::cluster::{
    create_control_plane_router, spawn_orchestrator, ClusterStore, ControlPlaneState,
    ControllerSettings, Job, Node, OrchestratorConfig, SliceController, SliceView, Workload,
};
use crate::config::{validate_config, ConfigError, ControllerConfig};
use crate::labels;
use crate::slice::{derive_state, Slice, SliceState};
use crate::topology::{classify, parse_topology, TopologyClass, TopologyError};
use crate::webhook::default_job;

use super::ServeArgs;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Topology(#[from] TopologyError),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Load a JSON or YAML manifest, chosen by file extension
pub fn load_manifest<T: DeserializeOwned>(path: &Path) -> CommandResult<T> {
    let content = std::fs::read_to_string(path)?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| CommandError::Manifest(e.to_string()))
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

// ============================================================================
// Topology & naming (Pure business logic)
// ============================================================================

/// What a topology string resolves to
#[derive(Debug, Clone)]
pub struct TopologyInfo {
    pub shape: String,
    pub dims: [u32; 3],
    pub class: TopologyClass,
    pub chips: u32,
    pub cubes: u32,
    pub placement_label: String,
}

pub fn describe_topology(shape: &str) -> CommandResult<TopologyInfo> {
    let topology = parse_topology(shape)?;
    Ok(TopologyInfo {
        shape: topology.to_string(),
        dims: topology.dims,
        class: topology.class,
        chips: topology.chips(),
        cubes: topology.cubes(),
        placement_label: topology.slice_level_label(),
    })
}

/// Class of a shape without failing on invalid input
pub fn topology_class(shape: &str) -> TopologyClass {
    classify(shape).1
}

// ============================================================================
// State derivation
// ============================================================================

/// Derive the state of a Slice manifest as of now
pub fn slice_state(path: &Path, staleness_timeout: Duration) -> CommandResult<(Slice, SliceState)> {
    let slice: Slice = load_manifest(path)?;
    let state = derive_state(&slice, Utc::now(), staleness_timeout);
    Ok((slice, state))
}

// ============================================================================
// Validate Commands
// ============================================================================

/// Outcome of defaulting one replica group
#[derive(Debug, Clone)]
pub struct GroupDefaults {
    pub name: String,
    pub topology: String,
    pub slice_size: String,
    pub placement_label: String,
}

/// Result of validating a job manifest
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub job: String,
    pub groups: Vec<GroupDefaults>,
    pub error: Option<String>,
}

/// Run the webhook defaulting over a job manifest
pub fn validate_job(path: &Path) -> CommandResult<ValidationResult> {
    let job: Job = load_manifest(path)?;
    let name = job.metadata.qualified_name();

    match default_job(job) {
        Ok(defaulted) => {
            let groups = defaulted
                .spec
                .replicated_jobs
                .iter()
                .filter_map(|rj| {
                    let template = &rj.template.spec.template;
                    Some(GroupDefaults {
                        name: rj.name.clone(),
                        topology: template.topology_annotation()?.to_string(),
                        slice_size: template.annotation(labels::PODSET_SLICE_SIZE)?.to_string(),
                        placement_label: template
                            .annotation(labels::PODSET_SLICE_REQUIRED_TOPOLOGY)?
                            .to_string(),
                    })
                })
                .collect();
            Ok(ValidationResult {
                valid: true,
                job: name,
                groups,
                error: None,
            })
        }
        Err(e) => Ok(ValidationResult {
            valid: false,
            job: name,
            groups: Vec::new(),
            error: Some(e.to_string()),
        }),
    }
}

// ============================================================================
// Serve
// ============================================================================

/// Merge command-line overrides into the loaded config
pub fn apply_serve_overrides(
    mut config: ControllerConfig,
    args: &ServeArgs,
) -> CommandResult<ControllerConfig> {
    if let Some(ref bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref name) = args.check_name {
        config.admission_check_name = name.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    validate_config(&config)?;
    Ok(config)
}

/// Run the control plane until ctrl-c
pub async fn serve(config: ControllerConfig) -> CommandResult<()> {
    let store = ClusterStore::new();
    let settings = ControllerSettings::from(&config);
    let controller = Arc::new(SliceController::new(Arc::new(store.clone()), settings));

    let shutdown = spawn_orchestrator(
        controller,
        store.subscribe(),
        OrchestratorConfig {
            workers: config.workers,
        },
    );

    let state = ControlPlaneState::new(store).with_staleness_timeout(config.staleness_timeout());
    let app = create_control_plane_router(state);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;

    info!("Control plane listening on {}", addr);
    info!("Answering admission check '{}'", config.admission_check_name);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    let _ = shutdown.send(());
    Ok(())
}

// ============================================================================
// HTTP Client for Control Plane
// ============================================================================

/// Client for communicating with the control plane
pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Client for `server`, or for the address in the config
    pub fn from_config(server: Option<&str>, config: &ControllerConfig) -> Self {
        match server {
            Some(url) => Self::new(url),
            None => {
                let host = match config.bind_addr.as_str() {
                    "0.0.0.0" | "::" => "localhost",
                    other => other,
                };
                Self::new(format!("http://{}:{}", host, config.port))
            }
        }
    }

    async fn get_json(&self, path: &str, what: &str) -> CommandResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(CommandError::Server(format!(
                "Failed to {}: {}",
                what,
                resp.status()
            )));
        }

        Ok(resp.json().await?)
    }

    /// Get cluster status
    pub async fn status(&self) -> CommandResult<serde_json::Value> {
        self.get_json("/v1/status", "get status").await
    }

    pub async fn list_slices(&self) -> CommandResult<Vec<SliceView>> {
        let body = self.get_json("/v1/slices", "list slices").await?;
        Ok(serde_json::from_value(body["items"].clone())?)
    }

    pub async fn list_workloads(&self) -> CommandResult<Vec<Workload>> {
        let body = self.get_json("/v1/workloads", "list workloads").await?;
        Ok(serde_json::from_value(body["items"].clone())?)
    }

    pub async fn list_nodes(&self) -> CommandResult<Vec<Node>> {
        let body = self.get_json("/v1/nodes", "list nodes").await?;
        Ok(serde_json::from_value(body["items"].clone())?)
    }
}
