//! Static description of a managed executable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Everything the manager needs to know to launch and supervise one
/// executable. Runtime state (observed/desired state, restart count, last
/// exit code) lives in the manager, not here.
///
/// ```
/// use epm_managed_process::ProcessRecord;
///
/// let record = ProcessRecord::new("api", "/usr/bin/api-server")
///     .with_args(["--port", "8080"])
///     .with_tag("web")
///     .with_dependency("db");
///
/// assert!(record.has_tag("web"));
/// assert!(record.dependencies.contains("db"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    /// Registry key, unique per manager
    pub name: String,
    /// Optional secondary identifier
    pub id: Option<String>,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub tags: BTreeSet<String>,
    /// Names that must be `Running` before this one starts
    pub dependencies: BTreeSet<String>,
    /// Overrides applied on top of the inherited environment
    pub environment: BTreeMap<String, String>,
    /// Directory the child runs in; relative `path` resolves against it
    pub working_directory: Option<PathBuf>,
    /// stdout and stderr are appended here when set
    pub log_file: Option<PathBuf>,
    pub auto_restart: bool,
    /// Per-record graceful stop window; the manager default applies when unset
    pub graceful_timeout: Option<Duration>,
}

impl ProcessRecord {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            id: None,
            path: path.into(),
            args: Vec::new(),
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            environment: BTreeMap::new(),
            working_directory: None,
            log_file: None,
            auto_restart: true,
            graceful_timeout: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_log_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(file.into());
        self
    }

    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = Some(timeout);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// True when `identifier` is this record's name or id
    pub fn is_named(&self, identifier: &str) -> bool {
        self.name == identifier || self.id.as_deref() == Some(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let record = ProcessRecord::new("worker", "bin/worker");
        assert!(record.auto_restart);
        assert!(record.args.is_empty());
        assert!(record.graceful_timeout.is_none());
        assert!(!record.has_tag("anything"));
    }

    #[test]
    fn test_is_named_matches_name_or_id() {
        let record = ProcessRecord::new("worker", "bin/worker").with_id("w-01");
        assert!(record.is_named("worker"));
        assert!(record.is_named("w-01"));
        assert!(!record.is_named("w-02"));
    }
}
