use chrono::{DateTime, Utc};
use epm_common::errors::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Number of transitions kept per process.
pub const STATE_HISTORY_LIMIT: usize = 100;

/// Observed state of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// No OS process exists for this record
    Stopped,
    /// Launch requested, OS has not confirmed the process yet
    Starting,
    /// Process is running normally
    Running,
    /// Termination in progress
    Stopping,
    /// Process exited while it was supposed to be running
    Crashed,
    /// Stop-then-start in progress as one operation
    Restarting,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Crashed => write!(f, "crashed"),
            ProcessState::Restarting => write!(f, "restarting"),
        }
    }
}

impl ProcessState {
    /// Check if the process is in a transitional state
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Stopping | ProcessState::Restarting
        )
    }

    /// Check if an OS process may exist for this state
    pub fn is_active(&self) -> bool {
        !matches!(self, ProcessState::Stopped | ProcessState::Crashed)
    }
}

/// What the operator wants; the monitor loop works to make observed match it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesiredState::Stopped => write!(f, "stopped"),
            DesiredState::Running => write!(f, "running"),
        }
    }
}

/// A state transition with timestamp and optional reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ProcessState,
    pub to_state: ProcessState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Per-process state machine.
///
/// ```text
/// Stopped -> Starting -> Running -> Stopping -> Stopped
///               |           |
///               v           +-----> Crashed -> Starting
///            Stopped        +-----> Restarting -> Starting
/// ```
///
/// `Crashed` may also fall back to `Stopped` when auto-restart is off or
/// the restart policy is exhausted.
#[derive(Debug, Clone)]
pub struct ProcessStateMachine {
    process_id: String,
    current_state: ProcessState,
    previous_state: Option<ProcessState>,
    state_history: VecDeque<StateTransition>,
    last_transition_time: DateTime<Utc>,
}

impl ProcessStateMachine {
    pub fn new(process_id: &str) -> Self {
        Self {
            process_id: process_id.to_string(),
            current_state: ProcessState::Stopped,
            previous_state: None,
            state_history: VecDeque::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn current_state(&self) -> ProcessState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<ProcessState> {
        self.previous_state
    }

    /// Transitions, oldest first
    pub fn state_history(&self) -> Vec<StateTransition> {
        self.state_history.iter().cloned().collect()
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    /// Check if a transition from current state to target state is valid
    pub fn is_valid_transition(&self, target_state: ProcessState) -> bool {
        use ProcessState::*;

        match (self.current_state, target_state) {
            (Stopped, Starting) => true,
            (Stopped, Restarting) => true,

            (Starting, Running) => true,
            (Starting, Stopped) => true, // launch failed
            (Starting, Crashed) => true,

            (Running, Stopping) => true,
            (Running, Crashed) => true,
            (Running, Restarting) => true,

            (Stopping, Stopped) => true,
            (Stopping, Running) => true, // terminate refused

            (Crashed, Starting) => true,
            (Crashed, Restarting) => true,
            (Crashed, Stopped) => true,

            (Restarting, Starting) => true,
            (Restarting, Running) => true, // terminate refused

            (state, target) if state == target => true,

            _ => false,
        }
    }

    /// Transition to a new state with optional reason
    pub fn transition_to(
        &mut self,
        target_state: ProcessState,
        reason: Option<String>,
    ) -> ProcessResult<()> {
        if !self.is_valid_transition(target_state) {
            return Err(ProcessError::invalid_state(
                &self.process_id,
                format!("transition to {}", target_state),
                self.current_state.to_string(),
            ));
        }

        if self.current_state == target_state {
            return Ok(());
        }

        let from_state = self.current_state;
        let now = Utc::now();
        self.state_history.push_back(StateTransition {
            from_state,
            to_state: target_state,
            timestamp: now,
            reason,
        });
        while self.state_history.len() > STATE_HISTORY_LIMIT {
            self.state_history.pop_front();
        }

        self.previous_state = Some(from_state);
        self.current_state = target_state;
        self.last_transition_time = now;

        tracing::debug!(
            "Process {} transitioned from {} to {}",
            self.process_id,
            from_state,
            target_state
        );

        Ok(())
    }

    pub fn transition_to_starting(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Starting, Some("Process start requested".to_string()))
    }

    pub fn transition_to_running(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Running, Some("Process started successfully".to_string()))
    }

    pub fn transition_to_stopping(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Stopping, Some("Process stop requested".to_string()))
    }

    pub fn transition_to_stopped(&mut self, reason: impl Into<String>) -> ProcessResult<()> {
        self.transition_to(ProcessState::Stopped, Some(reason.into()))
    }

    pub fn transition_to_crashed(&mut self, reason: impl Into<String>) -> ProcessResult<()> {
        self.transition_to(ProcessState::Crashed, Some(reason.into()))
    }

    pub fn transition_to_restarting(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Restarting, Some("Process restart requested".to_string()))
    }

    /// Check if the process can be started
    pub fn can_start(&self) -> bool {
        matches!(self.current_state, ProcessState::Stopped | ProcessState::Crashed)
    }

    /// Check if the process can be stopped
    pub fn can_stop(&self) -> bool {
        matches!(
            self.current_state,
            ProcessState::Running | ProcessState::Starting | ProcessState::Crashed
        )
    }

    pub fn time_in_current_state(&self) -> chrono::Duration {
        Utc::now() - self.last_transition_time
    }

    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.state_history.back()
    }

    /// Count transitions to a specific state
    pub fn count_transitions_to(&self, state: ProcessState) -> usize {
        self.state_history
            .iter()
            .filter(|t| t.to_state == state)
            .count()
    }
}
