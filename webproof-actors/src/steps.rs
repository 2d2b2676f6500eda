//! Status bookkeeping for a proving session's step sequence.
//!
//! Exactly one step is `Current` while the session runs. Completing it
//! promotes the next one; completing the last ends the session. Statuses only
//! move forward, and once the session leaves `Running` nothing changes again.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use webproof_config::StepConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Further,
    Current,
    Completed,
}

/// Whole-session outcome. Failures live here, never in a step's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum SessionState {
    Running,
    Completed,
    Error(String),
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The step at this index is now `Current`.
    Promoted(usize),
    /// The last step completed; the session is `Completed`.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("a session needs at least one step")]
    NoSteps,
    #[error("session is no longer running ({0:?})")]
    NotRunning(SessionState),
}

/// What observers see of the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsView {
    pub current_step: Option<usize>,
    pub step_statuses: Vec<StepStatus>,
    pub session_state: SessionState,
}

#[derive(Debug, Clone)]
pub struct Steps {
    configs: Vec<StepConfig>,
    statuses: Vec<StepStatus>,
    state: SessionState,
}

impl Steps {
    /// First step `Current`, the rest `Further`.
    ///
    /// ```
    /// use webproof_actors::steps::{Advance, SessionState, StepStatus, Steps};
    /// use webproof_config::{StepConfig, StepKind};
    ///
    /// let open = |label: &str| StepConfig {
    ///     label: label.into(),
    ///     kind: StepKind::StartPage { link: "https://a.test".into() },
    /// };
    /// let mut steps = Steps::new(vec![open("one"), open("two")]).unwrap();
    /// assert_eq!(steps.statuses(), &[StepStatus::Current, StepStatus::Further]);
    /// assert_eq!(steps.complete_current().unwrap(), Advance::Promoted(1));
    /// assert_eq!(steps.complete_current().unwrap(), Advance::Finished);
    /// assert_eq!(steps.state(), &SessionState::Completed);
    /// ```
    pub fn new(configs: Vec<StepConfig>) -> Result<Self, TransitionError> {
        if configs.is_empty() {
            return Err(TransitionError::NoSteps);
        }
        let mut statuses = vec![StepStatus::Further; configs.len()];
        statuses[0] = StepStatus::Current;
        Ok(Self {
            configs,
            statuses,
            state: SessionState::Running,
        })
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Index of the `Current` step while running.
    pub fn current(&self) -> Option<usize> {
        if self.state != SessionState::Running {
            return None;
        }
        self.statuses.iter().position(|s| *s == StepStatus::Current)
    }

    pub fn current_step(&self) -> Option<&StepConfig> {
        self.current().map(|i| &self.configs[i])
    }

    pub fn step(&self, idx: usize) -> Option<&StepConfig> {
        self.configs.get(idx)
    }

    pub fn statuses(&self) -> &[StepStatus] {
        &self.statuses
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn complete_current(&mut self) -> Result<Advance, TransitionError> {
        let idx = self.running_current()?;
        self.statuses[idx] = StepStatus::Completed;
        match self.statuses.get_mut(idx + 1) {
            Some(next) => {
                *next = StepStatus::Current;
                Ok(Advance::Promoted(idx + 1))
            }
            None => {
                self.state = SessionState::Completed;
                Ok(Advance::Finished)
            }
        }
    }

    /// End the session in `Error`; the current step keeps its status.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.running_current()?;
        self.state = SessionState::Error(reason.into());
        Ok(())
    }

    /// End the session because its UI surface went away.
    pub fn close(&mut self) -> Result<(), TransitionError> {
        self.running_current()?;
        self.state = SessionState::Closed;
        Ok(())
    }

    pub fn view(&self) -> StepsView {
        StepsView {
            current_step: self.current(),
            step_statuses: self.statuses.clone(),
            session_state: self.state.clone(),
        }
    }

    fn running_current(&self) -> Result<usize, TransitionError> {
        self.current()
            .ok_or_else(|| TransitionError::NotRunning(self.state.clone()))
    }
}
