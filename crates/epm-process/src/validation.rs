//! Validation and path resolution for process records.

use epm_common::{ProcessError, ProcessResult};
use std::path::{Path, PathBuf};

/// Validate a process name.
///
/// Names are registry keys and show up in log lines and file names, so
/// they are restricted to alphanumerics, `-`, `_` and `.`.
pub fn validate_process_name(name: &str) -> ProcessResult<()> {
    if name.is_empty() {
        return Err(ProcessError::configuration(
            "validation",
            "Process name cannot be empty",
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ProcessError::configuration(
            name,
            "Process name can only contain alphanumeric characters, '.', '-' and '_'",
        ));
    }

    Ok(())
}

/// Resolve an executable path against a working directory.
///
/// Absolute paths are used as-is. Relative paths are joined onto
/// `working_dir` when one is given, else onto the current directory.
/// The result must exist and, on unix, carry at least one execute bit.
pub fn resolve_executable(
    name: &str,
    path: &Path,
    working_dir: Option<&Path>,
) -> ProcessResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ProcessError::launch_failed(
            name,
            "Executable path cannot be empty",
        ));
    }

    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let base = match working_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|e| {
                ProcessError::launch_failed(name, format!("cannot read current directory: {}", e))
            })?,
        };
        base.join(path)
    };

    let metadata = std::fs::metadata(&resolved).map_err(|e| {
        ProcessError::launch_failed(name, format!("{}: {}", resolved.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(ProcessError::launch_failed(
            name,
            format!("{} is not a file", resolved.display()),
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ProcessError::launch_failed(
                name,
                format!("{}: permission denied", resolved.display()),
            ));
        }
    }

    Ok(resolved)
}
