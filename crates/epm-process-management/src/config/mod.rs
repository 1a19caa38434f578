use crate::lifecycle::RestartPolicy;
use crate::manager::{ManagerOptions, ScheduledAction};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use epm_common::ProcessResult;
use epm_managed_process::ProcessRecord;
use epm_scheduler::Trigger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod validation;

/// Top-level configuration structure
///
/// ```yaml
/// process_manager:
///   check_interval: 5s
///   shutdown_timeout: 30s
///   restart_policy:
///     strategy: exponential_backoff
///     initial_delay: 1s
///     max_delay: 1m
/// processes:
///   - name: db
///     path: /usr/bin/postgres
///     tags: [storage]
///   - name: api
///     path: bin/api
///     args: ["--port", "8080"]
///     dependencies: [db]
///     log_file: logs/api.log
/// schedules:
///   - process: api
///     action: restart
///     daily: "03:00"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcmanConfig {
    #[serde(default)]
    pub process_manager: ProcessManagerOptions,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

/// Process manager configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessManagerOptions {
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
    #[serde(default = "default_graceful_timeout", with = "duration_serde")]
    pub graceful_timeout: Duration,
    #[serde(default = "default_scheduler_poll_interval", with = "duration_serde")]
    pub scheduler_poll_interval: Duration,
    /// Base directory for relative executable paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

impl Default for ProcessManagerOptions {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            graceful_timeout: default_graceful_timeout(),
            scheduler_poll_interval: default_scheduler_poll_interval(),
            working_directory: None,
            log_level: default_log_level(),
            metrics_enabled: false,
            restart_policy: RestartPolicy::default(),
        }
    }
}

impl ProcessManagerOptions {
    pub fn to_manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            check_interval: self.check_interval,
            shutdown_timeout: self.shutdown_timeout,
            graceful_timeout: self.graceful_timeout,
            restart_policy: self.restart_policy.clone(),
            working_directory: self.working_directory.clone(),
        }
    }
}

/// One managed executable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub auto_restart: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_serde"
    )]
    pub graceful_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Disabled entries are registered but not started by `start_all`
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl ProcessConfig {
    pub fn to_record(&self) -> ProcessRecord {
        ProcessRecord {
            name: self.name.clone(),
            id: self.id.clone(),
            path: self.path.clone(),
            args: self.args.clone(),
            tags: self.tags.iter().cloned().collect(),
            dependencies: self.dependencies.iter().cloned().collect(),
            environment: self.environment.clone(),
            working_directory: self.working_directory.clone(),
            log_file: self.log_file.clone(),
            auto_restart: self.auto_restart,
            graceful_timeout: self.graceful_timeout,
        }
    }
}

/// A scheduled action against one process. Exactly one of `at`, `every`
/// and `daily` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Process name or id
    pub process: String,
    pub action: ScheduledAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_serde"
    )]
    pub every: Option<Duration>,
    /// "HH:MM" or "HH:MM:SS", local time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<String>,
}

impl ScheduleConfig {
    pub fn trigger(&self) -> ProcessResult<Trigger> {
        match (&self.at, &self.every, &self.daily) {
            (Some(at), None, None) => Ok(Trigger::At(*at)),
            (None, Some(every), None) => Ok(Trigger::Every(*every)),
            (None, None, Some(daily)) => Trigger::daily(daily),
            _ => Err(epm_common::ProcessError::invalid_trigger(format!(
                "schedule for '{}' must set exactly one of at, every, daily",
                self.process
            ))),
        }
    }
}

impl ProcmanConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: ProcmanConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Records for every configured process, in file order
    pub fn records(&self) -> Vec<ProcessRecord> {
        self.processes.iter().map(ProcessConfig::to_record).collect()
    }

    /// Names of processes that should be started on boot
    pub fn autostart_names(&self) -> Vec<String> {
        self.processes
            .iter()
            .filter(|p| p.autostart)
            .map(|p| p.name.clone())
            .collect()
    }
}

// Default value functions
fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_graceful_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_scheduler_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Durations as strings: "250ms", "5s", "2m", "1h"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn format_duration(duration: &Duration) -> String {
        if duration.subsec_millis() != 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}s", duration.as_secs())
        }
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = || format!("Invalid duration: {}", s);

        // "ms" before "s" since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            num.parse().map(Duration::from_millis).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('s') {
            num.parse().map(Duration::from_secs).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('m') {
            scaled_secs(num, 60).ok_or_else(invalid)
        } else if let Some(num) = s.strip_suffix('h') {
            scaled_secs(num, 3600).ok_or_else(invalid)
        } else {
            Err(format!("Duration must end with 'ms', 's', 'm' or 'h': {}", s))
        }
    }

    fn scaled_secs(num: &str, unit_secs: u64) -> Option<Duration> {
        num.parse::<u64>()
            .ok()?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
    }
}

pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&super::duration_serde::format_duration(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => super::duration_serde::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
