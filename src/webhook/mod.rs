//! Mutating admission webhook for TPU jobs

pub mod defaulting;
pub mod review;

use thiserror::Error;

pub use defaulting::default_job;
pub use review::{mutate, AdmissionRequest, AdmissionResponse, AdmissionReview, AdmissionStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error(
        "replicated job '{replicated_job}' uses {per_cube} chips per cube, \
         but each cube must be fully used ({required} chips)"
    )]
    AdmissionRejected {
        replicated_job: String,
        per_cube: u64,
        required: u32,
    },

    #[error(
        "replicated job '{replicated_job}' has parallelism {parallelism}, \
         which does not divide evenly over {cubes} cubes"
    )]
    UnevenParallelism {
        replicated_job: String,
        parallelism: u32,
        cubes: u32,
    },

    #[error("malformed admission request: {0}")]
    InvalidRequest(String),
}

impl WebhookError {
    /// HTTP-style status code reported in the admission response
    pub fn code(&self) -> u16 {
        match self {
            WebhookError::InvalidRequest(_) => 400,
            _ => 403,
        }
    }
}
