//! Declarative store - single source of truth for slices, workloads and nodes
//!
//! `ClusterStore` keeps every resource in a `DashMap` and maintains a reverse
//! index from workload key to the names of the slices it owns. The reconciler
//! only talks to it through the [`SliceClient`] trait, so a remote API server
//! can stand in for it without touching reconcile logic.
//!
//! Every mutation that concerns a workload publishes that workload's key on a
//! broadcast channel; the controller uses it to enqueue reconciles.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use super::node::Node;
use super::workload::{AdmissionCheckState, Workload};
use crate::slice::{derive_state, Slice, SliceCondition, SliceState, StatusError};

const EVENT_CAPACITY: usize = 1024;

/// Errors returned by store operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{0} '{1}' not found")]
    NotFound(&'static str, String),

    #[error("{0} '{1}' already exists")]
    AlreadyExists(&'static str, String),

    #[error("spec of slice '{0}' is immutable")]
    Immutable(String),

    #[error("slice '{name}' belongs to workload '{owner}'")]
    OwnedElsewhere { name: String, owner: String },

    #[error("status update rejected: {0}")]
    Status(#[from] StatusError),

    #[error("transient store error: {0}")]
    Transient(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(..))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(..))
    }
}

/// Store operations the reconciler depends on
#[async_trait]
pub trait SliceClient: Send + Sync {
    async fn get_workload(&self, key: &str) -> Result<Option<Workload>, StoreError>;

    async fn list_workload_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Slices owned by the workload `key`, by reverse index
    async fn list_owned_slices(&self, key: &str) -> Result<Vec<Slice>, StoreError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    async fn get_slice(&self, name: &str) -> Result<Option<Slice>, StoreError>;

    async fn create_slice(&self, slice: Slice) -> Result<Slice, StoreError>;

    async fn delete_slice(&self, name: &str) -> Result<(), StoreError>;

    async fn update_admission_check(
        &self,
        key: &str,
        state: AdmissionCheckState,
    ) -> Result<(), StoreError>;
}

/// In-memory declarative store
#[derive(Clone)]
pub struct ClusterStore {
    slices: Arc<DashMap<String, Slice>>,

    /// Workloads indexed by `namespace/name`
    workloads: Arc<DashMap<String, Workload>>,

    nodes: Arc<DashMap<String, Node>>,

    /// Workload key -> names of slices it owns
    owned: Arc<DashMap<String, BTreeSet<String>>>,

    events: broadcast::Sender<String>,
}

/// Counts for the status endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub nodes: usize,
    pub workloads: usize,
    pub admitted_workloads: usize,
    pub slices: usize,
    pub ready_slices: usize,
    pub failed_slices: usize,
}

impl ClusterStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            slices: Arc::new(DashMap::new()),
            workloads: Arc::new(DashMap::new()),
            nodes: Arc::new(DashMap::new()),
            owned: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Receive the keys of workloads whose inputs changed
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    fn notify(&self, key: &str) {
        // No receivers is fine; the periodic resync covers it
        let _ = self.events.send(key.to_string());
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Register or relabel a node
    pub fn upsert_node(&self, node: Node) {
        let name = node.metadata.name.clone();
        self.nodes.insert(name.clone(), node);
        self.notify_host_users(&name);
    }

    pub fn remove_node(&self, name: &str) -> Result<Node, StoreError> {
        let removed = self
            .nodes
            .remove(name)
            .map(|(_, n)| n)
            .ok_or_else(|| StoreError::NotFound("node", name.to_string()))?;
        self.notify_host_users(name);
        Ok(removed)
    }

    /// Publish every workload admitted onto `host`
    fn notify_host_users(&self, host: &str) {
        let keys: Vec<String> = self
            .workloads
            .iter()
            .filter(|w| w.uses_host(host))
            .map(|w| w.key().clone())
            .collect();
        for key in keys {
            self.notify(&key);
        }
    }

    pub fn get_node(&self, name: &str) -> Option<Node> {
        self.nodes.get(name).map(|r| r.clone())
    }

    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|r| r.clone()).collect();
        nodes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        nodes
    }

    // =========================================================================
    // Workloads
    // =========================================================================

    /// Create or replace a workload, as the queueing subsystem does
    pub fn upsert_workload(&self, mut workload: Workload) -> Workload {
        let key = workload.key();
        if workload.metadata.creation_timestamp.is_none() {
            workload.metadata.creation_timestamp = Some(Utc::now());
        }
        self.workloads.insert(key.clone(), workload.clone());
        self.notify(&key);
        workload
    }

    pub fn get_workload_sync(&self, key: &str) -> Option<Workload> {
        self.workloads.get(key).map(|r| r.clone())
    }

    pub fn remove_workload(&self, key: &str) -> Result<Workload, StoreError> {
        let removed = self
            .workloads
            .remove(key)
            .map(|(_, w)| w)
            .ok_or_else(|| StoreError::NotFound("workload", key.to_string()))?;
        self.notify(key);
        Ok(removed)
    }

    pub fn workloads(&self) -> Vec<Workload> {
        let mut workloads: Vec<Workload> = self.workloads.iter().map(|r| r.clone()).collect();
        workloads.sort_by_key(|w| w.key());
        workloads
    }

    // =========================================================================
    // Slices
    // =========================================================================

    pub fn get_slice(&self, name: &str) -> Option<Slice> {
        self.slices.get(name).map(|r| r.clone())
    }

    pub fn slices(&self) -> Vec<Slice> {
        let mut slices: Vec<Slice> = self.slices.iter().map(|r| r.clone()).collect();
        slices.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        slices
    }

    pub fn owned_slices(&self, key: &str) -> Vec<Slice> {
        let names = self
            .owned
            .get(key)
            .map(|r| r.clone())
            .unwrap_or_default();
        names.iter().filter_map(|n| self.get_slice(n)).collect()
    }

    /// Insert a new slice; fails if the name is taken
    pub fn insert_slice(&self, mut slice: Slice) -> Result<Slice, StoreError> {
        let name = slice.metadata.name.clone();
        if self.slices.contains_key(&name) {
            return Err(StoreError::AlreadyExists("slice", name));
        }
        if slice.metadata.creation_timestamp.is_none() {
            slice.metadata.creation_timestamp = Some(Utc::now());
        }

        if let Some(owner) = slice.owner_key() {
            self.owned.entry(owner).or_default().insert(name.clone());
        }
        self.slices.insert(name.clone(), slice.clone());
        debug!(slice = %name, "slice created");
        Ok(slice)
    }

    /// Create a slice, or confirm an existing one has the same spec
    pub fn apply_slice(&self, slice: Slice) -> Result<Slice, StoreError> {
        match self.get_slice(&slice.metadata.name) {
            Some(existing) if existing.spec_matches(&slice.spec) => Ok(existing),
            Some(_) => Err(StoreError::Immutable(slice.metadata.name)),
            None => self.insert_slice(slice),
        }
    }

    pub fn remove_slice(&self, name: &str) -> Result<Slice, StoreError> {
        let (_, slice) = self
            .slices
            .remove(name)
            .ok_or_else(|| StoreError::NotFound("slice", name.to_string()))?;

        if let Some(owner) = slice.owner_key() {
            if let Some(mut names) = self.owned.get_mut(&owner) {
                names.remove(name);
            }
            self.owned.remove_if(&owner, |_, names| names.is_empty());
            self.notify(&owner);
        }
        debug!(slice = %name, "slice deleted");
        Ok(slice)
    }

    /// Record a condition reported by the health agent
    pub fn set_slice_condition(
        &self,
        name: &str,
        condition: SliceCondition,
    ) -> Result<Slice, StoreError> {
        let updated = {
            let mut slice = self
                .slices
                .get_mut(name)
                .ok_or_else(|| StoreError::NotFound("slice", name.to_string()))?;
            slice.status.set_condition(condition)?;
            slice.clone()
        };
        if let Some(owner) = updated.owner_key() {
            self.notify(&owner);
        }
        Ok(updated)
    }

    /// Record where the hardware for a slice actually landed
    pub fn set_slice_placement(
        &self,
        name: &str,
        block_id: Option<String>,
        sub_block_ids: Vec<String>,
    ) -> Result<Slice, StoreError> {
        let mut slice = self
            .slices
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound("slice", name.to_string()))?;
        slice.status.block_id = block_id;
        slice.status.sub_block_ids = sub_block_ids;
        Ok(slice.clone())
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn stats(&self, staleness_timeout: std::time::Duration) -> ClusterStats {
        let now = Utc::now();
        let states: Vec<SliceState> = self
            .slices
            .iter()
            .map(|s| derive_state(&s, now, staleness_timeout))
            .collect();

        ClusterStats {
            nodes: self.nodes.len(),
            workloads: self.workloads.len(),
            admitted_workloads: self.workloads.iter().filter(|w| w.is_admitted()).count(),
            slices: states.len(),
            ready_slices: states.iter().filter(|s| s.is_ready()).count(),
            failed_slices: states.iter().filter(|s| s.is_error()).count(),
        }
    }
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SliceClient for ClusterStore {
    async fn get_workload(&self, key: &str) -> Result<Option<Workload>, StoreError> {
        Ok(self.get_workload_sync(key))
    }

    async fn list_workload_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.workloads.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_owned_slices(&self, key: &str) -> Result<Vec<Slice>, StoreError> {
        Ok(self.owned_slices(key))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.nodes())
    }

    async fn get_slice(&self, name: &str) -> Result<Option<Slice>, StoreError> {
        Ok(ClusterStore::get_slice(self, name))
    }

    async fn create_slice(&self, slice: Slice) -> Result<Slice, StoreError> {
        self.insert_slice(slice)
    }

    async fn delete_slice(&self, name: &str) -> Result<(), StoreError> {
        self.remove_slice(name).map(|_| ())
    }

    async fn update_admission_check(
        &self,
        key: &str,
        state: AdmissionCheckState,
    ) -> Result<(), StoreError> {
        let mut workload = self
            .workloads
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound("workload", key.to_string()))?;
        let check = state.name.clone();
        if workload.set_admission_check(state) {
            Ok(())
        } else {
            Err(StoreError::NotFound("admission check", check))
        }
    }
}
