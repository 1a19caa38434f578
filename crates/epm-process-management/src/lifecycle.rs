// Restart policy applied by the monitor loop after a crash

use crate::config::duration_serde;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cap on any computed backoff delay
const MAX_RESTART_DELAY: Duration = Duration::from_secs(300);

/// What the monitor does when a process with `desired_state = Running`
/// is found dead.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Leave the process stopped
    Never,
    /// Restart immediately, forever
    #[default]
    Unlimited,
    /// Restart immediately, at most `max_restarts` times
    FixedCount { max_restarts: u32 },
    /// Wait `initial_delay * multiplier^n` (capped at `max_delay`) before
    /// restart `n + 1`
    ExponentialBackoff {
        #[serde(with = "duration_serde")]
        initial_delay: Duration,
        #[serde(with = "duration_serde")]
        max_delay: Duration,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default)]
        max_restarts: Option<u32>,
    },
}

/// Outcome of consulting a [`RestartPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum RestartDecision {
    RestartNow,
    RestartAfter(Duration),
    GiveUp(String),
}

impl RestartPolicy {
    /// Decide what to do given how many auto-restarts were already attempted.
    pub fn decide(&self, restarts_so_far: u32) -> RestartDecision {
        match self {
            RestartPolicy::Never => RestartDecision::GiveUp("restart policy is never".to_string()),
            RestartPolicy::Unlimited => RestartDecision::RestartNow,
            RestartPolicy::FixedCount { max_restarts } => {
                if restarts_so_far >= *max_restarts {
                    RestartDecision::GiveUp(format!(
                        "restart limit reached ({} of {})",
                        restarts_so_far, max_restarts
                    ))
                } else {
                    RestartDecision::RestartNow
                }
            }
            RestartPolicy::ExponentialBackoff { max_restarts, .. } => {
                if let Some(max) = max_restarts {
                    if restarts_so_far >= *max {
                        return RestartDecision::GiveUp(format!(
                            "restart limit reached ({} of {})",
                            restarts_so_far, max
                        ));
                    }
                }
                match self.delay_for(restarts_so_far) {
                    delay if delay.is_zero() => RestartDecision::RestartNow,
                    delay => RestartDecision::RestartAfter(delay),
                }
            }
        }
    }

    /// Backoff delay before restart number `attempt + 1`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            RestartPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.max(1.0).powi(attempt.min(64) as i32);
                let secs = (initial_delay.as_secs_f64() * factor)
                    .min(max_delay.as_secs_f64())
                    .min(MAX_RESTART_DELAY.as_secs_f64());
                Duration::from_secs_f64(secs.max(0.0))
            }
            _ => Duration::ZERO,
        }
    }
}

fn default_multiplier() -> f64 {
    2.0
}
