//! Label, annotation and resource-name constants shared across the crate
//!
//! These are the stable contract surface with the queueing subsystem, the
//! node labelers and the hardware health agent. Nothing else in the crate
//! spells these strings out.

/// Label on a job that marks it as submitted to a queue
pub const QUEUE_NAME_LABEL: &str = "kueue.x-k8s.io/queue-name";

/// Pod template annotation carrying the requested shape (e.g. "4x4x4")
pub const TOPOLOGY_ANNOTATION: &str = "cloud.google.com/gke-tpu-topology";

/// Node selector key for the accelerator type
pub const ACCELERATOR_SELECTOR: &str = "cloud.google.com/gke-tpu-accelerator";

/// Node label holding the physical block identifier
pub const BLOCK_LABEL: &str = "cloud.google.com/gce-topology-block";

/// Node label holding the physical sub-block identifier
pub const SUB_BLOCK_LABEL: &str = "cloud.google.com/gce-topology-subblock";

/// Topology level naming a single node
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Node label reporting slice health
pub const HEALTH_LABEL: &str = "cloud.google.com/gke-tpu-slice-health";

/// Value of [`HEALTH_LABEL`] on nodes that may host new slices
pub const HEALTHY: &str = "healthy";

/// Scheduling annotation: coarse topology level every pod must share
pub const PODSET_REQUIRED_TOPOLOGY: &str = "kueue.x-k8s.io/podset-required-topology";

/// Scheduling annotation: fine topology level each slice must share
pub const PODSET_SLICE_REQUIRED_TOPOLOGY: &str = "kueue.x-k8s.io/podset-slice-required-topology";

/// Scheduling annotation: pods per fine-level unit
pub const PODSET_SLICE_SIZE: &str = "kueue.x-k8s.io/podset-slice-size";

/// Slice annotations recording the owning workload
pub const OWNER_WORKLOAD_NAMESPACE: &str = "slice.tpu.dev/owner-workload-namespace";
pub const OWNER_WORKLOAD_NAME: &str = "slice.tpu.dev/owner-workload-name";

/// Slice annotations recording the originating job
pub const OWNER_JOB_NAMESPACE: &str = "slice.tpu.dev/owner-job-namespace";
pub const OWNER_JOB_NAME: &str = "slice.tpu.dev/owner-job-name";

/// Slice labels recording the replica it backs
pub const REPLICATED_JOB_LABEL: &str = "slice.tpu.dev/replicated-job";
pub const REPLICA_INDEX_LABEL: &str = "slice.tpu.dev/replica-index";

/// Extended resource name for accelerator chips
pub const TPU_RESOURCE: &str = "google.com/tpu";

/// Node label key carrying the partition id for a sub-cube shape
pub fn partition_id_label(shape: &str) -> String {
    format!("cloud.google.com/gke-tpu-partition-{}-id", shape)
}
