//! Identifier types used across crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduled job identifier.
///
/// Ids are handed out by a scheduler from a monotonically increasing
/// counter, so comparing two ids tells you which job was submitted first.
///
/// # Example
/// ```
/// use epm_common::JobId;
///
/// let first = JobId::new(1);
/// let second = JobId::new(2);
/// assert!(first < second);
/// assert_eq!(first.to_string(), "job-1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}
