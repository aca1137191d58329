//! Deterministic slice names
//!
//! A slice is named `{namespace}-{job}-{replicated job}-{index}` when that
//! join is short enough and can be split back into its parts, i.e. every
//! component is lowercase alphanumeric. Any other key gets a sanitized prefix
//! of at most 54 characters plus `-` and an 8-letter digest of the exact
//! logical key. Plain names end in the decimal index and hashed names end in
//! letters, so the two forms never meet.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest name the orchestrator accepts
pub const MAX_NAME_LEN: usize = 63;

const HASH_LEN: usize = 8;
const PREFIX_LEN: usize = MAX_NAME_LEN - HASH_LEN - 1;

/// Logical identity of the replica a slice backs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceKey {
    pub namespace: String,
    pub job: String,
    pub replicated_job: String,
    pub index: u32,
}

impl SliceKey {
    pub fn new(
        namespace: impl Into<String>,
        job: impl Into<String>,
        replicated_job: impl Into<String>,
        index: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            job: job.into(),
            replicated_job: replicated_job.into(),
            index,
        }
    }

    pub fn slice_name(&self) -> String {
        slice_name(&self.namespace, &self.job, &self.replicated_job, self.index)
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.namespace, self.job, self.replicated_job, self.index
        )
    }
}

/// Name of the slice backing one replica
pub fn slice_name(namespace: &str, job: &str, replicated_job: &str, index: u32) -> String {
    let full = format!("{}-{}-{}-{}", namespace, job, replicated_job, index);
    let plain = [namespace, job, replicated_job].iter().all(|part| is_plain_component(part));
    if plain && full.len() <= MAX_NAME_LEN {
        return full;
    }

    let key = format!("{}/{}/{}/{}", namespace, job, replicated_job, index);
    let prefix: String = full
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(PREFIX_LEN)
        .collect();
    let prefix = prefix.trim_end_matches('-');
    format!("{}-{}", prefix, key_digest(&key))
}

/// Non-empty and lowercase alphanumeric, so `-` can only be a separator
fn is_plain_component(part: &str) -> bool {
    !part.is_empty()
        && part
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// First bytes of the key's SHA-256, one lowercase letter each
fn key_digest(key: &str) -> String {
    Sha256::digest(key.as_bytes())
        .iter()
        .take(HASH_LEN)
        .map(|b| (b'a' + b % 26) as char)
        .collect()
}
