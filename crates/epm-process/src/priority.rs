//! Scheduling priority (nice value) of a running process.

use epm_common::{ProcessError, ProcessResult};

/// Set the nice value of `pid`. Lowering it below the current value
/// usually needs privileges.
pub fn set_priority(pid: u32, nice: i32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        // SAFETY: setpriority reads its integer arguments and touches no memory of ours
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
        if rc == -1 {
            let errno = nix::errno::Errno::last();
            return Err(ProcessError::priority_failed(
                pid.to_string(),
                format!("setpriority({}) refused: {}", nice, errno),
            ));
        }
        tracing::debug!(pid, nice, "Priority changed");
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = nice;
        Err(unsupported(pid))
    }
}

/// Current nice value of `pid`.
pub fn get_priority(pid: u32) -> ProcessResult<i32> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;

        // -1 is a valid nice value, so errno is the only failure signal
        Errno::clear();
        // SAFETY: as above
        let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };
        match Errno::last_raw() {
            0 => Ok(nice),
            raw => Err(ProcessError::priority_failed(
                pid.to_string(),
                format!("getpriority refused: {}", Errno::from_raw(raw)),
            )),
        }
    }

    #[cfg(not(unix))]
    {
        Err(unsupported(pid))
    }
}

#[cfg(not(unix))]
fn unsupported(pid: u32) -> ProcessError {
    ProcessError::priority_failed(pid.to_string(), "priorities are only supported on unix")
}
