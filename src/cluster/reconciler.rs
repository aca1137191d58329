//! Slice reconciliation
//!
//! `reconcile` is a pure function from the freshly read state of one
//! workload (the workload itself, the slices it owns and the node list) to
//! the writes that move the store toward the desired state. It keeps no
//! state between calls, so it can be re-run at any time, abandoned halfway
//! through, or run concurrently for different workloads.
//!
//! Desired state for an admitted workload: one slice per replica of every
//! relevant pod set, each spec'd from the replica's share of the topology
//! assignment. Readiness of those slices is folded into the workload's
//! admission check.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::assignment::{partition_ids, relevant_topology, AssignmentError, TopologyAssignment};
use super::node::Node;
use super::resources::ObjectMeta;
use super::workload::{AdmissionCheckState, CheckState, PodSet, Workload};
use crate::labels;
use crate::slice::{derive_state, Slice, SliceKey, SliceSpec, SliceState};
use crate::topology::{AcceleratorType, Topology};

/// Settings and clock for one reconcile
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    /// Admission check this controller answers for
    pub check_name: String,
    pub staleness_timeout: Duration,
    /// Upper bound on how long a pending workload waits for its next pass
    pub resync_interval: Duration,
    pub now: DateTime<Utc>,
}

/// Freshly read state for one workload key
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub key: &'a str,
    /// `None` when the workload no longer exists
    pub workload: Option<&'a Workload>,
    /// Slices the reverse index lists for `key`
    pub slices: &'a [Slice],
    pub nodes: &'a [Node],
}

/// A single declarative write
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    CreateSlice(Slice),
    DeleteSlice(String),
    SetCheckState(AdmissionCheckState),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub writes: Vec<Write>,
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn is_converged(&self) -> bool {
        self.writes.is_empty()
    }
}

/// A slice the workload should have
#[derive(Debug, Clone)]
struct DesiredSlice {
    key: SliceKey,
    slice: Slice,
}

/// Why a relevant pod set cannot be turned into slices yet
#[derive(Debug, Clone)]
struct PodSetProblem {
    pod_set: String,
    reason: String,
}

/// Per pod set readiness tally
#[derive(Debug, Default)]
struct Progress {
    expected: usize,
    ready: usize,
}

/// Compute the writes for one workload
pub fn reconcile(input: &ReconcileInput<'_>, ctx: &ReconcileContext) -> ReconcileOutcome {
    let Some(workload) = input.workload else {
        debug!(workload = %input.key, "workload gone, releasing slices");
        return release_all(input.slices);
    };

    if workload.status.finished || workload.metadata.is_deleting() {
        debug!(workload = %input.key, "workload finished or deleting, releasing slices");
        return release_all(input.slices);
    }

    let Some(current) = workload.admission_check(&ctx.check_name) else {
        return ReconcileOutcome::default();
    };

    if !workload.is_admitted() {
        return release_all(input.slices);
    }

    // The queueing subsystem evicts on Retry/Rejected; wait for that.
    if matches!(current.state, CheckState::Retry | CheckState::Rejected) {
        return ReconcileOutcome::default();
    }

    let mut desired: Vec<DesiredSlice> = Vec::new();
    let mut problems: Vec<PodSetProblem> = Vec::new();
    let mut order: Vec<String> = Vec::new();
    for pod_set in &workload.spec.pod_sets {
        let Some((topology, accelerator)) = relevant_topology(&pod_set.template) else {
            continue;
        };
        order.push(pod_set.name.clone());
        match desired_for_pod_set(workload, pod_set, topology, accelerator, input.nodes) {
            Ok(slices) => desired.extend(slices),
            Err(reason) => {
                warn!(
                    workload = %input.key,
                    pod_set = %pod_set.name,
                    "cannot build slices: {}", reason
                );
                problems.push(PodSetProblem {
                    pod_set: pod_set.name.clone(),
                    reason,
                });
            }
        }
    }

    let existing: BTreeMap<&str, &Slice> = input
        .slices
        .iter()
        .map(|s| (s.metadata.name.as_str(), s))
        .collect();
    let wanted: BTreeSet<&str> = desired.iter().map(|d| d.slice.metadata.name.as_str()).collect();

    let mut writes = Vec::new();
    let mut progress: BTreeMap<String, Progress> = BTreeMap::new();
    let mut failures: Vec<String> = Vec::new();
    let mut requeue: Option<Duration> = None;

    for want in &desired {
        let tally = progress.entry(want.key.replicated_job.clone()).or_default();
        tally.expected += 1;

        match existing.get(want.slice.metadata.name.as_str()) {
            None => writes.push(Write::CreateSlice(want.slice.clone())),
            Some(have) if !have.metadata.is_deleting() && !have.spec_matches(&want.slice.spec) => {
                // Left over from an earlier admission; recreate on a later pass
                writes.push(Write::DeleteSlice(have.metadata.name.clone()));
            }
            Some(have) => {
                let state = derive_state(have, ctx.now, ctx.staleness_timeout);
                if state.is_ready() {
                    tally.ready += 1;
                } else if state.is_error() {
                    failures.push(format!(
                        "slice {} ({} replica {}) is {}",
                        have.metadata.name, want.key.replicated_job, want.key.index, state
                    ));
                } else {
                    if state == SliceState::Unknown {
                        warn!(
                            slice = %have.metadata.name,
                            "slice is ready with an unrecognized reason, holding"
                        );
                    }
                    requeue = min_duration(requeue, time_to_stale(have, ctx));
                }
            }
        }
    }

    for slice in input.slices {
        let name = slice.metadata.name.as_str();
        if !wanted.contains(name) && !slice.metadata.is_deleting() {
            writes.push(Write::DeleteSlice(name.to_string()));
        }
    }

    let (state, message) = if !failures.is_empty() {
        (CheckState::Retry, failures.join("; "))
    } else {
        let all_ready = problems.is_empty()
            && progress.values().all(|p| p.ready == p.expected)
            && !writes.iter().any(|w| matches!(w, Write::CreateSlice(_) | Write::DeleteSlice(_)));
        let summary = summarize(&order, &progress, &problems);
        if all_ready {
            (CheckState::Ready, summary)
        } else {
            requeue = min_duration(requeue, Some(ctx.resync_interval));
            (CheckState::Pending, summary)
        }
    };

    let next = AdmissionCheckState::new(ctx.check_name.clone(), state, message);
    if !current.same_as(&next) {
        writes.push(Write::SetCheckState(next));
    }

    ReconcileOutcome {
        writes,
        requeue_after: if state == CheckState::Pending { requeue } else { None },
    }
}

fn release_all(slices: &[Slice]) -> ReconcileOutcome {
    ReconcileOutcome {
        writes: slices
            .iter()
            .filter(|s| !s.metadata.is_deleting())
            .map(|s| Write::DeleteSlice(s.metadata.name.clone()))
            .collect(),
        requeue_after: None,
    }
}

fn desired_for_pod_set(
    workload: &Workload,
    pod_set: &PodSet,
    topology: Topology,
    accelerator: AcceleratorType,
    nodes: &[Node],
) -> Result<Vec<DesiredSlice>, String> {
    let assignment: &TopologyAssignment = workload
        .pod_set_assignment(&pod_set.name)
        .and_then(|a| a.topology_assignment.as_ref())
        .ok_or_else(|| "admission has no topology assignment".to_string())?;

    let slice_size: u32 = pod_set
        .template
        .annotation(labels::PODSET_SLICE_SIZE)
        .ok_or_else(|| format!("missing {} annotation", labels::PODSET_SLICE_SIZE))?
        .parse()
        .map_err(|_| format!("{} is not a number", labels::PODSET_SLICE_SIZE))?;
    let pods_per_replica = slice_size.checked_mul(topology.cubes()).ok_or_else(|| {
        format!(
            "{} of {} is too large for {} cubes",
            labels::PODSET_SLICE_SIZE,
            slice_size,
            topology.cubes()
        )
    })?;

    let assigned = assignment.total_pods().map_err(|e| e.to_string())?;
    if assigned != pod_set.count {
        return Err(AssignmentError::PodCountMismatch {
            assigned,
            expected: pod_set.count,
        }
        .to_string());
    }

    let pieces = assignment
        .split_by_replica(pods_per_replica)
        .map_err(|e| e.to_string())?;

    let fine_label = topology.slice_level_label();
    let mut slices = Vec::with_capacity(pieces.len());
    for (index, piece) in pieces.iter().enumerate() {
        let ids = partition_ids(piece, nodes, &fine_label).map_err(|e| e.to_string())?;
        if ids.iter().any(String::is_empty) {
            return Err(format!(
                "replica {} is placed on a node without label {}",
                index, fine_label
            ));
        }
        let blocks: Vec<String> = partition_ids(piece, nodes, labels::BLOCK_LABEL)
            .map_err(|e| e.to_string())?
            .into_iter()
            .filter(|b| !b.is_empty())
            .collect();

        let key = SliceKey::new(
            workload.namespace(),
            workload.job_name(),
            pod_set.name.clone(),
            index as u32,
        );
        let slice = build_slice(workload, &key, topology, accelerator, &fine_label, blocks, ids);
        slices.push(DesiredSlice { key, slice });
    }
    Ok(slices)
}

fn build_slice(
    workload: &Workload,
    key: &SliceKey,
    topology: Topology,
    accelerator: AcceleratorType,
    fine_label: &str,
    blocks: Vec<String>,
    partition_ids: Vec<String>,
) -> Slice {
    let mut metadata = ObjectMeta::named(key.slice_name());
    metadata
        .labels
        .insert(labels::REPLICATED_JOB_LABEL.to_string(), key.replicated_job.clone());
    metadata
        .labels
        .insert(labels::REPLICA_INDEX_LABEL.to_string(), key.index.to_string());

    let annotations = &mut metadata.annotations;
    annotations.insert(
        labels::OWNER_WORKLOAD_NAMESPACE.to_string(),
        workload.namespace().to_string(),
    );
    annotations.insert(
        labels::OWNER_WORKLOAD_NAME.to_string(),
        workload.metadata.name.clone(),
    );
    annotations.insert(labels::OWNER_JOB_NAMESPACE.to_string(), key.namespace.clone());
    annotations.insert(labels::OWNER_JOB_NAME.to_string(), key.job.clone());

    let mut node_selector = BTreeMap::new();
    if !blocks.is_empty() {
        node_selector.insert(labels::BLOCK_LABEL.to_string(), blocks);
    }
    node_selector.insert(fine_label.to_string(), partition_ids);

    Slice::new(
        metadata,
        SliceSpec {
            accelerator_type: accelerator,
            topology: topology.to_string(),
            node_selector,
        },
    )
}

fn summarize(
    order: &[String],
    progress: &BTreeMap<String, Progress>,
    problems: &[PodSetProblem],
) -> String {
    if order.is_empty() {
        return "no slices required".to_string();
    }
    order
        .iter()
        .map(|name| {
            if let Some(problem) = problems.iter().find(|p| &p.pod_set == name) {
                format!("{}: {}", name, problem.reason)
            } else {
                let p = progress.get(name);
                format!(
                    "{}: {}/{} slices ready",
                    name,
                    p.map(|p| p.ready).unwrap_or(0),
                    p.map(|p| p.expected).unwrap_or(0)
                )
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Time until a not-yet-ready slice would be classified stale
fn time_to_stale(slice: &Slice, ctx: &ReconcileContext) -> Option<Duration> {
    let since = match slice.status.condition(crate::slice::CONDITION_READY) {
        Some(c) if c.is_false() => c.last_transition_time,
        Some(_) => return None,
        None => slice.metadata.creation_timestamp?,
    };
    let elapsed = (ctx.now - since).to_std().unwrap_or_default();
    Some(
        ctx.staleness_timeout
            .saturating_sub(elapsed)
            .max(Duration::from_secs(1)),
    )
}

fn min_duration(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
