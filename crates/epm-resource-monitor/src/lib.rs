//! # EPM Resource Monitor
//!
//! `MetricsSource` implementation backed by `sysinfo`.
//!
//! CPU percentages are computed by sysinfo from the delta between two
//! refreshes of the same process, so the first sample for a pid reads 0%
//! and later samples reflect usage over the monitor interval.

use epm_common::{ProcessError, ProcessResult};
use epm_managed_process::{MetricsSource, ResourceSample};
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, System};
use tracing::debug;

/// Samples cpu and memory for individual pids.
pub struct SysinfoMetrics {
    system: Mutex<System>,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SysinfoMetrics {
    fn sample(&self, pid: u32) -> ProcessResult<ResourceSample> {
        let mut system = self.system.lock();

        // Without explicit refresh kinds sysinfo reports zeros
        let sysinfo_pid = Pid::from_u32(pid);
        system.refresh_process_specifics(
            sysinfo_pid,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );

        let process = system.process(sysinfo_pid).ok_or_else(|| {
            ProcessError::monitoring(pid.to_string(), "process not visible to sysinfo")
        })?;

        let sample = ResourceSample {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
        };

        debug!(
            "Resource usage for PID {}: CPU={:.1}%, Memory={:.1} MB",
            pid,
            sample.cpu_percent,
            sample.memory_mb()
        );

        Ok(sample)
    }
}
