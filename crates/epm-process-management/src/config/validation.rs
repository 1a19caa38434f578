use super::*;
use anyhow::{anyhow, Result};
use std::collections::HashSet;

/// Validate the complete configuration
pub fn validate_config(config: &ProcmanConfig) -> Result<()> {
    validate_process_manager_options(&config.process_manager)?;
    validate_process_configs(&config.processes)?;
    validate_schedules(&config.schedules, &config.processes)?;
    Ok(())
}

fn validate_process_manager_options(options: &ProcessManagerOptions) -> Result<()> {
    if options.check_interval.is_zero() {
        return Err(anyhow!("Check interval must be greater than 0"));
    }

    if options.shutdown_timeout.is_zero() {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    if options.scheduler_poll_interval.is_zero() {
        return Err(anyhow!("Scheduler poll interval must be greater than 0"));
    }

    if let RestartPolicy::ExponentialBackoff {
        initial_delay,
        max_delay,
        multiplier,
        ..
    } = &options.restart_policy
    {
        if initial_delay > max_delay {
            return Err(anyhow!(
                "Restart initial_delay ({:?}) exceeds max_delay ({:?})",
                initial_delay,
                max_delay
            ));
        }
        if !multiplier.is_finite() || *multiplier < 1.0 {
            return Err(anyhow!("Restart multiplier must be at least 1.0, got: {}", multiplier));
        }
    }

    match options.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(anyhow!(
            "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
            options.log_level
        )),
    }
}

fn validate_process_configs(processes: &[ProcessConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for process in processes {
        epm_process::validate_process_name(&process.name).map_err(|e| anyhow!("{}", e))?;

        if !names.insert(process.name.as_str()) {
            return Err(anyhow!("Duplicate process name: {}", process.name));
        }

        if process.path.as_os_str().is_empty() {
            return Err(anyhow!("Process {} has an empty path", process.name));
        }
    }

    for process in processes {
        for dependency in &process.dependencies {
            if dependency == &process.name {
                return Err(anyhow!("Process {} depends on itself", process.name));
            }
            if !names.contains(dependency.as_str()) {
                return Err(anyhow!(
                    "Process {} depends on unknown process: {}",
                    process.name,
                    dependency
                ));
            }
        }
    }

    Ok(())
}

fn validate_schedules(schedules: &[ScheduleConfig], processes: &[ProcessConfig]) -> Result<()> {
    for schedule in schedules {
        let known = processes.iter().any(|p| {
            p.name == schedule.process || p.id.as_deref() == Some(schedule.process.as_str())
        });
        if !known {
            return Err(anyhow!("Schedule references unknown process: {}", schedule.process));
        }

        let trigger = schedule.trigger().map_err(|e| anyhow!("{}", e))?;
        if let Trigger::Every(every) = trigger {
            if every.is_zero() {
                return Err(anyhow!(
                    "Schedule for {} has a zero interval",
                    schedule.process
                ));
            }
        }
    }
    Ok(())
}
