//! Job defaulting and validation
//!
//! For every replica group that asks for a supported TPU topology the job
//! gets the scheduling annotations the queueing subsystem needs, a required
//! node affinity on healthy hosts, and a check that the group fills whole
//! cubes. Groups that do not ask for slices pass through untouched.

use tracing::debug;

use super::WebhookError;
use crate::cluster::assignment::relevant_topology;
use crate::cluster::job::{Job, NodeSelectorRequirement, PodTemplate, ReplicatedJob};
use crate::labels;
use crate::topology::Topology;

/// Default and validate `job`, returning the mutated copy
pub fn default_job(mut job: Job) -> Result<Job, WebhookError> {
    if !job.has_queue_label() {
        return Ok(job);
    }

    for replicated in &mut job.spec.replicated_jobs {
        let Some((topology, _)) = relevant_topology(&replicated.template.spec.template) else {
            continue;
        };

        let slice_size = check_full_cubes(replicated, topology)?;
        let template = &mut replicated.template.spec.template;
        annotate(template, topology, slice_size);
        require_healthy_nodes(template);

        debug!(
            job = %job.metadata.name,
            replicated_job = %replicated.name,
            topology = %topology,
            slice_size,
            "defaulted replica group"
        );
    }

    Ok(job)
}

/// Verify the group uses whole cubes and return the pods per cube
fn check_full_cubes(replicated: &ReplicatedJob, topology: Topology) -> Result<u32, WebhookError> {
    let parallelism = replicated.template.spec.parallelism();
    let chips = replicated.template.spec.template.chips_per_pod();
    let cubes = topology.cubes();
    let required = topology.unit_chips();

    let total = u64::from(parallelism).checked_mul(chips).ok_or_else(|| {
        WebhookError::InvalidRequest(format!(
            "replicated job '{}' requests more chips than can be counted",
            replicated.name
        ))
    })?;
    let per_cube = total / u64::from(cubes);
    if total % u64::from(cubes) != 0 || per_cube != u64::from(required) {
        return Err(WebhookError::AdmissionRejected {
            replicated_job: replicated.name.clone(),
            per_cube,
            required,
        });
    }

    if parallelism % cubes != 0 {
        return Err(WebhookError::UnevenParallelism {
            replicated_job: replicated.name.clone(),
            parallelism,
            cubes,
        });
    }
    Ok(parallelism / cubes)
}

fn annotate(template: &mut PodTemplate, topology: Topology, slice_size: u32) {
    let annotations = &mut template.metadata.annotations;
    annotations.insert(
        labels::PODSET_REQUIRED_TOPOLOGY.to_string(),
        labels::BLOCK_LABEL.to_string(),
    );
    annotations.insert(
        labels::PODSET_SLICE_REQUIRED_TOPOLOGY.to_string(),
        topology.slice_level_label(),
    );
    annotations.insert(labels::PODSET_SLICE_SIZE.to_string(), slice_size.to_string());
}

/// Require healthy hosts unless the caller already constrains health
fn require_healthy_nodes(template: &mut PodTemplate) {
    if template.constrains_node_label(labels::HEALTH_LABEL) {
        return;
    }
    template.require_node_label(NodeSelectorRequirement {
        key: labels::HEALTH_LABEL.to_string(),
        operator: "In".to_string(),
        values: vec![labels::HEALTHY.to_string()],
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(topology: &str, parallelism: u32, chips: u32) -> Job {
        let yaml = format!(
            r#"
apiVersion: jobset.x-k8s.io/v1alpha2
kind: JobSet
metadata:
  name: train
  namespace: research
  labels:
    kueue.x-k8s.io/queue-name: tpu-queue
spec:
  replicatedJobs:
    - name: workers
      replicas: 2
      template:
        spec:
          parallelism: {parallelism}
          completions: {parallelism}
          template:
            metadata:
              annotations:
                cloud.google.com/gke-tpu-topology: "{topology}"
            spec:
              nodeSelector:
                cloud.google.com/gke-tpu-accelerator: tpu-v7x
              containers:
                - name: trainer
                  image: trainer:latest
                  resources:
                    limits:
                      google.com/tpu: {chips}
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn template(job: &Job) -> &PodTemplate {
        &job.spec.replicated_jobs[0].template.spec.template
    }

    #[test]
    fn test_full_cube_group_is_annotated() {
        let out = default_job(job("4x4x12", 48, 4)).unwrap();
        let t = template(&out);
        assert_eq!(t.annotation(labels::PODSET_SLICE_SIZE), Some("16"));
        assert_eq!(
            t.annotation(labels::PODSET_REQUIRED_TOPOLOGY),
            Some(labels::BLOCK_LABEL)
        );
        assert_eq!(
            t.annotation(labels::PODSET_SLICE_REQUIRED_TOPOLOGY),
            Some(labels::SUB_BLOCK_LABEL)
        );
        assert!(t.constrains_node_label(labels::HEALTH_LABEL));
    }

    #[test]
    fn test_partial_cube_is_rejected() {
        let err = default_job(job("4x4x4", 16, 1)).unwrap_err();
        assert_eq!(
            err,
            WebhookError::AdmissionRejected {
                replicated_job: "workers".to_string(),
                per_cube: 16,
                required: 64,
            }
        );
        let message = err.to_string();
        assert!(message.contains("workers"));
        assert!(message.contains("16"));
        assert!(message.contains("64"));
    }

    #[test]
    fn test_remainder_is_rejected() {
        // 65 * 2 = 130 chips over 2 cubes: 65 per cube, not 64
        assert!(default_job(job("4x4x8", 65, 2)).is_err());
        // 129 chips over 2 cubes floors to 64 but leaves a remainder
        assert!(matches!(
            default_job(job("4x4x8", 129, 1)),
            Err(WebhookError::AdmissionRejected { per_cube: 64, .. })
        ));
    }

    #[test]
    fn test_uneven_parallelism_is_rejected() {
        // 64 chips per cube, but 2 pods cannot be spread over 3 cubes
        assert!(matches!(
            default_job(job("4x4x12", 2, 96)),
            Err(WebhookError::UnevenParallelism { cubes: 3, .. })
        ));
    }

    #[test]
    fn test_uncountable_chips_are_malformed() {
        let mut j = job("4x4x8", u32::MAX, u32::MAX);
        let containers = &mut j.spec.replicated_jobs[0].template.spec.template.spec.containers;
        let second = containers[0].clone();
        containers.push(second);

        let err = default_job(j).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidRequest(_)));
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn test_subslice_uses_partition_label() {
        let out = default_job(job("2x2x1", 1, 4)).unwrap();
        let t = template(&out);
        assert_eq!(t.annotation(labels::PODSET_SLICE_SIZE), Some("1"));
        assert_eq!(
            t.annotation(labels::PODSET_SLICE_REQUIRED_TOPOLOGY),
            Some("cloud.google.com/gke-tpu-partition-2x2x1-id")
        );
        assert!(default_job(job("2x2x1", 2, 4)).is_err());
    }

    #[test]
    fn test_unqueued_job_passes_through() {
        let mut input = job("4x4x4", 16, 1);
        input.metadata.labels.clear();
        assert_eq!(default_job(input.clone()).unwrap(), input);
    }

    #[test]
    fn test_irrelevant_groups_pass_through() {
        let mut invalid = job("3x4x4", 16, 1);
        let out = default_job(invalid.clone()).unwrap();
        assert_eq!(out, invalid);

        invalid = job("4x4x4", 16, 1);
        invalid.spec.replicated_jobs[0]
            .template
            .spec
            .template
            .spec
            .node_selector
            .insert(labels::ACCELERATOR_SELECTOR.to_string(), "tpu-v5p".to_string());
        assert_eq!(default_job(invalid.clone()).unwrap(), invalid);
    }

    #[test]
    fn test_existing_health_constraint_is_kept() {
        let mut input = job("4x4x4", 16, 4);
        input.spec.replicated_jobs[0]
            .template
            .spec
            .template
            .spec
            .node_selector
            .insert(labels::HEALTH_LABEL.to_string(), "degraded".to_string());

        let out = default_job(input).unwrap();
        let t = template(&out);
        assert!(t.spec.affinity.is_none());
        assert_eq!(t.spec.node_selector[labels::HEALTH_LABEL], "degraded");
    }

    #[test]
    fn test_health_affinity_added_to_each_term() {
        let mut input = job("4x4x4", 16, 4);
        let t = &mut input.spec.replicated_jobs[0].template.spec.template;
        for zone in ["a", "b"] {
            t.spec
                .affinity
                .get_or_insert_with(Default::default)
                .node_affinity
                .get_or_insert_with(Default::default)
                .required
                .get_or_insert_with(Default::default)
                .node_selector_terms
                .push(crate::cluster::job::NodeSelectorTerm {
                    match_expressions: vec![NodeSelectorRequirement {
                        key: "zone".to_string(),
                        operator: "In".to_string(),
                        values: vec![zone.to_string()],
                    }],
                    extra: Default::default(),
                });
        }

        let out = default_job(input).unwrap();
        let terms = &template(&out)
            .spec
            .affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|n| n.required.as_ref())
            .unwrap()
            .node_selector_terms;
        assert_eq!(terms.len(), 2);
        for term in terms {
            assert_eq!(term.match_expressions.len(), 2);
            assert_eq!(term.match_expressions[1].key, labels::HEALTH_LABEL);
            assert_eq!(term.match_expressions[1].values, vec![labels::HEALTHY]);
        }
    }

    #[test]
    fn test_unknown_fields_survive() {
        let out = default_job(job("4x4x4", 16, 4)).unwrap();
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(
            value["spec"]["replicatedJobs"][0]["template"]["spec"]["completions"],
            16
        );
        assert_eq!(
            value["spec"]["replicatedJobs"][0]["template"]["spec"]["template"]["spec"]
                ["containers"][0]["image"],
            "trainer:latest"
        );
    }
}
