// src/services/core/infrastructure/chaos_engineering/experiment_state.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Experiment lifecycle states, ordered by level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    Created,
    Starting,
    Started,
    SelfHealing,
    Finalizing,
    Finished,
    Failed,
}

impl ExperimentState {
    pub const ALL: [ExperimentState; 7] = [
        ExperimentState::Created,
        ExperimentState::Starting,
        ExperimentState::Started,
        ExperimentState::SelfHealing,
        ExperimentState::Finalizing,
        ExperimentState::Finished,
        ExperimentState::Failed,
    ];

    pub fn level(&self) -> u8 {
        match self {
            ExperimentState::Created => 0,
            ExperimentState::Starting => 1,
            ExperimentState::Started => 2,
            ExperimentState::SelfHealing => 3,
            ExperimentState::Finalizing => 4,
            ExperimentState::Finished => 5,
            ExperimentState::Failed => 6,
        }
    }

    pub fn from_level(level: u8) -> Option<ExperimentState> {
        Self::ALL.iter().copied().find(|state| state.level() == level)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ExperimentState::Finished | ExperimentState::Failed)
    }

    /// Successor on the straight path. Terminal states have none.
    pub fn next_state(&self) -> Option<ExperimentState> {
        if self.is_complete() {
            return None;
        }
        Self::from_level(self.level() + 1)
    }

    /// Allowed moves: one level forward, STARTED skipping self-healing into
    /// FINALIZING, or any live state into FAILED.
    pub fn can_transition_to(&self, next: ExperimentState) -> bool {
        if self.is_complete() {
            return false;
        }
        next == ExperimentState::Failed
            || self.next_state() == Some(next)
            || (*self == ExperimentState::Started && next == ExperimentState::Finalizing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentState::Created => "CREATED",
            ExperimentState::Starting => "STARTING",
            ExperimentState::Started => "STARTED",
            ExperimentState::SelfHealing => "SELF_HEALING",
            ExperimentState::Finalizing => "FINALIZING",
            ExperimentState::Finished => "FINISHED",
            ExperimentState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
