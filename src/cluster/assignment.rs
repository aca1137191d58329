//! Topology assignment mapping
//!
//! The queueing subsystem places a pod set by writing a topology assignment:
//! an ordered list of label levels (coarsest first, ending at the hostname)
//! and a list of leaf domains, each a tuple of label values plus the number
//! of pods placed there. This module cuts that assignment into per-replica
//! pieces and turns each piece into the physical partition ids the replica
//! occupies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::PodTemplate;
use super::node::Node;
use crate::labels;
use crate::topology::{parse_topology, AcceleratorType, Topology};

/// Errors produced while mapping an assignment
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("topology assignment has no '{}' level", labels::HOSTNAME_LABEL)]
    MissingHostnameLevel,

    #[error("domain {index} has {found} values for {expected} levels")]
    MalformedDomain {
        index: usize,
        found: usize,
        expected: usize,
    },

    #[error("assignment places more than {} pods", u32::MAX)]
    PodCountOverflow,

    #[error("assignment places {assigned} pods, expected {expected}")]
    PodCountMismatch { assigned: u32, expected: u32 },

    #[error("{pods} pods cannot be split into replicas of {per_replica}")]
    UnevenReplicas { pods: u32, per_replica: u32 },
}

/// Placement decision for one pod set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyAssignment {
    /// Label keys, coarsest first
    pub levels: Vec<String>,

    pub domains: Vec<TopologyDomain>,
}

/// One leaf domain: a value per level and the pods placed in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDomain {
    pub values: Vec<String>,
    pub count: u32,
}

impl TopologyDomain {
    pub fn new(values: Vec<String>, count: u32) -> Self {
        Self { values, count }
    }
}

impl TopologyAssignment {
    pub fn total_pods(&self) -> Result<u32, AssignmentError> {
        let total: u64 = self.domains.iter().map(|d| u64::from(d.count)).sum();
        u32::try_from(total).map_err(|_| AssignmentError::PodCountOverflow)
    }

    /// Whether any domain places pods on the node named `host`
    pub fn places_on(&self, host: &str) -> bool {
        match self.hostname_index() {
            Some(i) => self
                .domains
                .iter()
                .any(|d| d.values.get(i).map(String::as_str) == Some(host)),
            None => false,
        }
    }

    fn hostname_index(&self) -> Option<usize> {
        self.levels.iter().position(|l| l == labels::HOSTNAME_LABEL)
    }

    /// Cut the assignment into consecutive pieces of `pods_per_replica` pods.
    ///
    /// Domains are consumed in order, and a domain that straddles two
    /// replicas is split between them, so the pieces never overlap.
    pub fn split_by_replica(
        &self,
        pods_per_replica: u32,
    ) -> Result<Vec<TopologyAssignment>, AssignmentError> {
        let total = self.total_pods()?;
        if pods_per_replica == 0 || total % pods_per_replica != 0 {
            return Err(AssignmentError::UnevenReplicas {
                pods: total,
                per_replica: pods_per_replica,
            });
        }

        let mut pieces = Vec::with_capacity((total / pods_per_replica) as usize);
        let mut current = TopologyAssignment {
            levels: self.levels.clone(),
            domains: Vec::new(),
        };
        let mut filled = 0u32;

        for domain in &self.domains {
            let mut remaining = domain.count;
            while remaining > 0 {
                let take = remaining.min(pods_per_replica - filled);
                current
                    .domains
                    .push(TopologyDomain::new(domain.values.clone(), take));
                remaining -= take;
                filled += take;
                if filled == pods_per_replica {
                    pieces.push(std::mem::replace(
                        &mut current,
                        TopologyAssignment {
                            levels: self.levels.clone(),
                            domains: Vec::new(),
                        },
                    ));
                    filled = 0;
                }
            }
        }

        Ok(pieces)
    }

    /// Values of `level` across the domains, first appearance order, deduplicated
    pub fn level_values(&self, level: &str) -> Vec<String> {
        let Some(index) = self.levels.iter().position(|l| l == level) else {
            return Vec::new();
        };
        let mut values: Vec<String> = Vec::new();
        for domain in &self.domains {
            if let Some(v) = domain.values.get(index) {
                if !values.contains(v) {
                    values.push(v.clone());
                }
            }
        }
        values
    }
}

/// Physical partition ids touched by `assignment`.
///
/// For every leaf domain the node at the hostname level is looked up and
/// its `label_key` value appended, keeping first-appearance order and
/// skipping duplicates. An unknown node, or a node without the label,
/// contributes `""`; callers treat that as an error.
pub fn partition_ids(
    assignment: &TopologyAssignment,
    nodes: &[Node],
    label_key: &str,
) -> Result<Vec<String>, AssignmentError> {
    let host_index = assignment
        .hostname_index()
        .ok_or(AssignmentError::MissingHostnameLevel)?;

    let mut ids: Vec<String> = Vec::new();
    for (index, domain) in assignment.domains.iter().enumerate() {
        let host = domain
            .values
            .get(host_index)
            .ok_or(AssignmentError::MalformedDomain {
                index,
                found: domain.values.len(),
                expected: assignment.levels.len(),
            })?;

        let id = nodes
            .iter()
            .find(|n| n.name() == host)
            .and_then(|n| n.label(label_key))
            .unwrap_or("")
            .to_string();

        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Topology of a pod template the slice machinery handles.
///
/// Returns `None` unless the template has a valid topology annotation and
/// selects the supported accelerator type.
pub fn relevant_topology(template: &PodTemplate) -> Option<(Topology, AcceleratorType)> {
    let topology = parse_topology(template.topology_annotation()?).ok()?;
    let accelerator = template.accelerator_selector()?.parse().ok()?;
    Some((topology, accelerator))
}

pub fn is_relevant(template: &PodTemplate) -> bool {
    relevant_topology(template).is_some()
}
