//! Slice state derivation
//!
//! Classifies a Slice from its deletion marker, its conditions and how long
//! it has been waiting. The checks run in a fixed order and the first match
//! wins:
//!
//! 1. deletion marker → `Deleted`
//! 2. hardware failure or creation failure → `Failed`
//! 3. unready for longer than the staleness timeout → `Stale`
//! 4. `Ready=True` → `Active` / `ActiveDegraded` by reason
//! 5. no `Ready` condition yet → `Created`
//! 6. otherwise → `Activating`

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::{
    reason, Slice, CONDITION_CREATION_FAILED, CONDITION_READY,
};

/// Default time a slice may stay unready before it is considered stale
pub const DEFAULT_STALENESS_TIMEOUT: Duration = Duration::from_secs(600);

/// Lifecycle state of a Slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceState {
    /// Created; the health agent has not reported yet
    Created,
    /// Hardware is being brought up
    Activating,
    /// Healthy and usable
    Active,
    /// Usable with reduced health
    ActiveDegraded,
    /// Hardware or creation failure
    Failed,
    /// Being torn down
    Deleted,
    /// Did not become ready within the staleness timeout
    Stale,
    /// Ready with a reason code this controller does not know; held
    Unknown,
}

impl SliceState {
    /// Whether a job may run on a slice in this state
    pub fn is_ready(&self) -> bool {
        matches!(self, SliceState::Active | SliceState::ActiveDegraded)
    }

    /// Whether the slice needs remediation
    pub fn is_error(&self) -> bool {
        matches!(self, SliceState::Failed | SliceState::Stale)
    }
}

impl fmt::Display for SliceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SliceState::Created => "Created",
            SliceState::Activating => "Activating",
            SliceState::Active => "Active",
            SliceState::ActiveDegraded => "ActiveDegraded",
            SliceState::Failed => "Failed",
            SliceState::Deleted => "Deleted",
            SliceState::Stale => "Stale",
            SliceState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

fn elapsed_beyond(since: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed > timeout,
        // `since` is in the future
        Err(_) => false,
    }
}

/// Derive the state of `slice` at `now`
pub fn derive_state(slice: &Slice, now: DateTime<Utc>, staleness_timeout: Duration) -> SliceState {
    if slice.metadata.is_deleting() {
        return SliceState::Deleted;
    }

    let ready = slice.status.condition(CONDITION_READY);
    let creation_failed = slice
        .status
        .condition(CONDITION_CREATION_FAILED)
        .map(|c| c.is_true())
        .unwrap_or(false);
    let hardware_failed = ready
        .map(|c| c.is_false() && c.reason == reason::HARDWARE_FAILURE)
        .unwrap_or(false);
    if hardware_failed || creation_failed {
        return SliceState::Failed;
    }

    let stale = match ready {
        None => slice
            .metadata
            .creation_timestamp
            .map(|created| elapsed_beyond(created, now, staleness_timeout))
            .unwrap_or(false),
        Some(c) => c.is_false() && elapsed_beyond(c.last_transition_time, now, staleness_timeout),
    };
    if stale {
        return SliceState::Stale;
    }

    match ready {
        Some(c) if c.is_true() => match c.reason.as_str() {
            reason::ACTIVE => SliceState::Active,
            reason::ACTIVE_DEGRADED => SliceState::ActiveDegraded,
            _ => SliceState::Unknown,
        },
        None => SliceState::Created,
        Some(_) => SliceState::Activating,
    }
}
