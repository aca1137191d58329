//! Slices - the partition resources backing job replicas

pub mod naming;
pub mod resource;
pub mod state;

pub use naming::{slice_name, SliceKey, MAX_NAME_LEN};
pub use resource::{
    reason, ConditionStatus, Slice, SliceCondition, SliceSpec, SliceStatus, StatusError,
    CONDITION_CREATION_FAILED, CONDITION_READY,
};
pub use state::{derive_state, SliceState, DEFAULT_STALENESS_TIMEOUT};
