//! Resource sampling interface.

use epm_common::ProcessResult;
use serde::{Deserialize, Serialize};

/// Raw resource numbers for one process at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

impl ResourceSample {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Source of cpu and memory numbers, polled by the monitor loop.
///
/// Errors are logged and skipped by the caller, never fatal.
pub trait MetricsSource: Send + Sync {
    fn sample(&self, pid: u32) -> ProcessResult<ResourceSample>;
}
