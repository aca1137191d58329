//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::{TopologyInfo, ValidationResult};
use crate::cluster::{Node, SliceView, Workload};
use crate::labels;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    let mut push_row = |cells: Vec<String>| {
        let last = cells.len().saturating_sub(1);
        for (i, cell) in cells.into_iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < last && i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(&cell);
            }
        }
        output.push('\n');
    };

    push_row(headers.iter().map(|h| h.to_uppercase()).collect());
    for row in rows {
        push_row(row);
    }

    output
}

fn or_dash(value: Option<&str>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or("-")
        .to_string()
}

// ============================================================================
// Resource tables
// ============================================================================

pub fn format_slice_list(slices: &[SliceView]) -> String {
    let headers = &["name", "state", "topology", "owner", "partitions"];
    let rows = slices
        .iter()
        .map(|view| {
            let slice = &view.slice;
            let partitions = slice
                .spec
                .node_selector
                .iter()
                .filter(|(key, _)| key.as_str() != labels::BLOCK_LABEL)
                .flat_map(|(_, values)| values.iter().cloned())
                .collect::<Vec<_>>()
                .join(",");
            vec![
                view.name.clone(),
                view.state.to_string(),
                slice.spec.topology.clone(),
                or_dash(slice.owner_key().as_deref()),
                or_dash(Some(&partitions)),
            ]
        })
        .collect();
    format_table(headers, rows)
}

pub fn format_workload_list(workloads: &[Workload], check_name: &str) -> String {
    let headers = &["workload", "admitted", "check", "message"];
    let rows = workloads
        .iter()
        .map(|wl| {
            let check = wl.admission_check(check_name);
            vec![
                wl.key(),
                if wl.is_admitted() { "yes" } else { "no" }.to_string(),
                check
                    .map(|c| format!("{:?}", c.state))
                    .unwrap_or_else(|| "-".to_string()),
                or_dash(check.map(|c| c.message.as_str())),
            ]
        })
        .collect();
    format_table(headers, rows)
}

pub fn format_node_list(nodes: &[Node]) -> String {
    let headers = &["name", "block", "sub-block", "health"];
    let rows = nodes
        .iter()
        .map(|node| {
            vec![
                node.name().to_string(),
                or_dash(node.label(labels::BLOCK_LABEL)),
                or_dash(node.label(labels::SUB_BLOCK_LABEL)),
                or_dash(node.label(labels::HEALTH_LABEL)),
            ]
        })
        .collect();
    format_table(headers, rows)
}

// ============================================================================
// Single results
// ============================================================================

pub fn format_topology(info: &TopologyInfo) -> String {
    format!(
        "Topology:  {}\nClass:     {}\nChips:     {}\nCubes:     {}\nPlacement: {}\n",
        info.shape, info.class, info.chips, info.cubes, info.placement_label
    )
}

pub fn format_validation(result: &ValidationResult) -> String {
    if !result.valid {
        return format!(
            "✗ {} rejected: {}\n",
            result.job,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut output = format!("✓ {} admitted\n", result.job);
    if result.groups.is_empty() {
        output.push_str("  no replica groups request TPU slices\n");
        return output;
    }
    for group in &result.groups {
        output.push_str(&format!(
            "  {}: topology {}, slice size {}, placed by {}\n",
            group.name, group.topology, group.slice_size, group.placement_label
        ));
    }
    output
}

pub fn format_status(status: &serde_json::Value) -> String {
    let stats = &status["stats"];
    let count = |key: &str| stats[key].as_u64().unwrap_or(0);
    format!(
        "Status:    {}\nNodes:     {}\nWorkloads: {} ({} admitted)\nSlices:    {} ({} ready, {} failed)\n",
        status["status"].as_str().unwrap_or("unknown"),
        count("nodes"),
        count("workloads"),
        count("admittedWorkloads"),
        count("slices"),
        count("readySlices"),
        count("failedSlices"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::{describe_topology, GroupDefaults};

    #[test]
    fn test_format_table_empty() {
        assert_eq!(format_table(&["name"], vec![]), "No resources found.\n");
    }

    #[test]
    fn test_format_table_aligns() {
        let out = format_table(
            &["name", "state"],
            vec![
                vec!["a".to_string(), "Active".to_string()],
                vec!["longer-name".to_string(), "Stale".to_string()],
            ],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "NAME          STATE");
        assert_eq!(lines[1], "a             Active");
        assert_eq!(lines[2], "longer-name   Stale");
    }

    #[test]
    fn test_format_node_list() {
        let nodes = vec![Node::new("host-0").with_label(labels::BLOCK_LABEL, "b0")];
        let out = format_node_list(&nodes);
        assert!(out.contains("host-0"));
        assert!(out.contains("b0"));
    }

    #[test]
    fn test_format_topology() {
        let out = format_topology(&describe_topology("2x2x1").unwrap());
        assert!(out.contains("Subslice"));
        assert!(out.contains("gke-tpu-partition-2x2x1-id"));
    }

    #[test]
    fn test_format_validation() {
        let ok = ValidationResult {
            valid: true,
            job: "ns/train".to_string(),
            groups: vec![GroupDefaults {
                name: "workers".to_string(),
                topology: "4x4x4".to_string(),
                slice_size: "16".to_string(),
                placement_label: labels::SUB_BLOCK_LABEL.to_string(),
            }],
            error: None,
        };
        assert!(format_validation(&ok).contains("slice size 16"));

        let rejected = ValidationResult {
            valid: false,
            job: "ns/train".to_string(),
            groups: vec![],
            error: Some("bad".to_string()),
        };
        assert!(format_validation(&rejected).contains("rejected: bad"));
    }

    #[test]
    fn test_format_status() {
        let status = serde_json::json!({
            "status": "ok",
            "stats": {"nodes": 2, "workloads": 1, "admittedWorkloads": 1,
                      "slices": 3, "readySlices": 2, "failedSlices": 1}
        });
        let out = format_status(&status);
        assert!(out.contains("Slices:    3 (2 ready, 1 failed)"));
    }
}
