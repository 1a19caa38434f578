//! Process existence checking.

use epm_common::{ProcessError, ProcessResult};

/// Check if a process with the given PID exists.
///
/// On Unix this uses `kill(pid, 0)`, which delivers no signal but reports
/// whether the process is still present. A zombie (exited, not yet reaped)
/// still counts as existing; callers that own the child should prefer
/// `try_wait` on it and use this only for processes they did not spawn.
///
/// * `Ok(true)` - Process exists
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - The check itself failed
///
/// ```rust,no_run
/// use epm_process::process_exists;
///
/// if process_exists(1234).unwrap_or(false) {
///     println!("Process 1234 is running");
/// }
/// ```
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            // Exists, owned by someone else
            Err(nix::errno::Errno::EPERM) => Ok(true),
            Err(e) => Err(ProcessError::monitoring(
                pid.to_string(),
                format!("Failed to check process: {}", e),
            )),
        }
    }

    #[cfg(not(unix))]
    {
        Err(ProcessError::monitoring(
            pid.to_string(),
            "process existence checks are only supported on unix",
        ))
    }
}
