//! Slice Controller - drives reconciles against the store
//!
//! For one workload key the controller:
//! - Reads the workload, its owned slices and the node list
//! - Runs the pure reconciler over that snapshot
//! - Applies the resulting writes, tolerating races with other writers
//!
//! Every store call goes through bounded exponential backoff. A write that
//! still fails is logged and skipped; the next pass recomputes it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::reconciler::{reconcile, ReconcileContext, ReconcileInput, ReconcileOutcome, Write};
use super::retry::{with_backoff, RetryPolicy};
use super::store::{SliceClient, StoreError};
use crate::config::ControllerConfig;

/// Errors that abort a single reconcile
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed to read state for '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("{failed} of {total} writes for '{key}' failed")]
    Writes {
        key: String,
        failed: usize,
        total: usize,
    },
}

/// Settings the controller needs from the full config
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub check_name: String,
    pub staleness_timeout: Duration,
    pub resync_interval: Duration,
    pub retry: RetryPolicy,
}

impl From<&ControllerConfig> for ControllerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            check_name: config.admission_check_name.clone(),
            staleness_timeout: config.staleness_timeout(),
            resync_interval: config.resync_interval(),
            retry: config.retry.clone(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

/// Reconciles workloads one key at a time
#[derive(Clone)]
pub struct SliceController {
    client: Arc<dyn SliceClient>,
    settings: ControllerSettings,
}

impl SliceController {
    pub fn new(client: Arc<dyn SliceClient>, settings: ControllerSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Every workload key in the store, for periodic resync
    pub async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let client = self.client.clone();
        with_backoff(&self.settings.retry, "list workloads", || {
            let client = client.clone();
            async move { client.list_workload_keys().await }
        })
        .await
    }

    /// Run one reconcile for `key` and apply its writes
    pub async fn reconcile_key(&self, key: &str) -> Result<ReconcileOutcome, ControllerError> {
        let policy = &self.settings.retry;
        let client = &self.client;
        let read_err = |source| ControllerError::Read {
            key: key.to_string(),
            source,
        };

        let workload = with_backoff(policy, "get workload", || client.get_workload(key))
            .await
            .map_err(read_err)?;
        let slices = with_backoff(policy, "list owned slices", || client.list_owned_slices(key))
            .await
            .map_err(read_err)?;
        let nodes = with_backoff(policy, "list nodes", || client.list_nodes())
            .await
            .map_err(read_err)?;

        let ctx = ReconcileContext {
            check_name: self.settings.check_name.clone(),
            staleness_timeout: self.settings.staleness_timeout,
            resync_interval: self.settings.resync_interval,
            now: Utc::now(),
        };
        let outcome = reconcile(
            &ReconcileInput {
                key,
                workload: workload.as_ref(),
                slices: &slices,
                nodes: &nodes,
            },
            &ctx,
        );

        if outcome.is_converged() {
            debug!(workload = %key, "converged");
            return Ok(outcome);
        }

        let total = outcome.writes.len();
        let mut failed = 0;
        for write in &outcome.writes {
            if let Err(e) = self.apply(key, write).await {
                warn!(workload = %key, "write failed: {}", e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(ControllerError::Writes {
                key: key.to_string(),
                failed,
                total,
            });
        }
        Ok(outcome)
    }

    async fn apply(&self, key: &str, write: &Write) -> Result<(), StoreError> {
        let policy = &self.settings.retry;
        let client = &self.client;
        match write {
            Write::CreateSlice(slice) => {
                let name = slice.metadata.name.as_str();
                match with_backoff(policy, "create slice", || client.create_slice(slice.clone()))
                    .await
                {
                    Ok(_) => {
                        info!(workload = %key, slice = %name, topology = %slice.spec.topology, "created slice");
                        Ok(())
                    }
                    // Created by an earlier, interrupted pass
                    Err(e) if e.is_already_exists() => self.confirm_owner(key, name).await,
                    Err(e) => Err(e),
                }
            }
            Write::DeleteSlice(name) => {
                match with_backoff(policy, "delete slice", || client.delete_slice(name)).await {
                    Ok(()) => {
                        info!(workload = %key, slice = %name, "deleted slice");
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Write::SetCheckState(state) => {
                with_backoff(policy, "update admission check", || {
                    client.update_admission_check(key, state.clone())
                })
                .await?;
                info!(
                    workload = %key,
                    state = ?state.state,
                    "admission check updated: {}", state.message
                );
                Ok(())
            }
        }
    }

    /// An existing slice only counts as ours if it names `key` as owner
    async fn confirm_owner(&self, key: &str, name: &str) -> Result<(), StoreError> {
        let policy = &self.settings.retry;
        let client = &self.client;
        let existing = with_backoff(policy, "get slice", || client.get_slice(name)).await?;
        match existing {
            Some(slice) => match slice.owner_key() {
                Some(owner) if owner == key => Ok(()),
                owner => Err(StoreError::OwnedElsewhere {
                    name: name.to_string(),
                    owner: owner.unwrap_or_default(),
                }),
            },
            // Gone again; the next pass recreates it
            None => Err(StoreError::NotFound("slice", name.to_string())),
        }
    }
}
