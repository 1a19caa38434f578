//! Process termination primitives.

use epm_common::{ProcessError, ProcessResult};

/// What happened when a signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    Delivered,
    /// The target was already gone (ESRCH).
    AlreadyExited,
}

/// Ask a process to shut down (SIGTERM).
pub fn terminate_gracefully(pid: u32) -> ProcessResult<SignalDelivery> {
    #[cfg(unix)]
    {
        send(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    {
        Err(unsupported(pid))
    }
}

/// Force kill a process (SIGKILL).
pub fn force_kill(pid: u32) -> ProcessResult<SignalDelivery> {
    #[cfg(unix)]
    {
        send(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    {
        Err(unsupported(pid))
    }
}

#[cfg(unix)]
fn send(pid: u32, signal: nix::sys::signal::Signal) -> ProcessResult<SignalDelivery> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => {
            tracing::trace!(pid, ?signal, "Signal delivered");
            Ok(SignalDelivery::Delivered)
        }
        Err(nix::errno::Errno::ESRCH) => Ok(SignalDelivery::AlreadyExited),
        Err(e) => Err(ProcessError::terminate_failed(
            pid.to_string(),
            format!("{:?} refused: {}", signal, e),
        )),
    }
}

#[cfg(not(unix))]
fn unsupported(pid: u32) -> ProcessError {
    ProcessError::terminate_failed(pid.to_string(), "signals are only supported on unix")
}
