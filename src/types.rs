// src/types.rs

use serde::{Deserialize, Serialize};

/// Category of disruption an experiment method performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentType {
    Resource,
    Network,
    State,
}

impl ExperimentType {
    pub const ALL: [ExperimentType; 3] = [
        ExperimentType::Resource,
        ExperimentType::Network,
        ExperimentType::State,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentType::Resource => "RESOURCE",
            ExperimentType::Network => "NETWORK",
            ExperimentType::State => "STATE",
        }
    }
}

impl std::fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health reported by a target for a given experiment category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerHealth {
    Normal,
    RunningExperiment,
    DoesNotExist,
}

impl ContainerHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerHealth::Normal => "NORMAL",
            ContainerHealth::RunningExperiment => "RUNNING_EXPERIMENT",
            ContainerHealth::DoesNotExist => "DOES_NOT_EXIST",
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, ContainerHealth::Normal)
    }
}

impl std::fmt::Display for ContainerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity attached to operator notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationLevel {
    Good,
    Warn,
    Error,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Good => "GOOD",
            NotificationLevel::Warn => "WARN",
            NotificationLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
