//! tpuslice - TPU slice lifecycle controller
//!
//! Validates TPU jobs at admission, creates one Slice per admitted job
//! replica from the queueing subsystem's topology assignment, tracks Slice
//! health, and reports readiness back through an admission check.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod labels;
pub mod slice;
pub mod topology;
pub mod webhook;
