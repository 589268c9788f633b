// src/services/core/infrastructure/notification_module/chaos_event.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::core::infrastructure::chaos_engineering::experiment_state::ExperimentState;
use crate::types::{ExperimentType, NotificationLevel};
use crate::utils::error::ExperimentFailure;

/// Lifecycle event emitted at every experiment state transition.
///
/// Carries enough of the target and method to render an audit line without
/// going back to the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosExperimentEvent {
    pub experiment_id: Uuid,
    pub target_identity: String,
    pub target_name: String,
    pub container_type: String,
    pub method_name: String,
    pub experiment_type: ExperimentType,
    pub previous_state: ExperimentState,
    pub new_state: ExperimentState,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: NotificationLevel,
    pub error: Option<ExperimentFailure>,
}

impl ChaosExperimentEvent {
    pub fn error_code(&self) -> Option<u32> {
        self.error.as_ref().map(ExperimentFailure::code)
    }

    pub fn is_transition(&self) -> bool {
        self.previous_state != self.new_state
    }

    pub fn render(&self) -> String {
        let mut line = format!(
            "[{}] {} on {} ({}): {} {} -> {}",
            self.experiment_id,
            self.method_name,
            self.target_name,
            self.container_type,
            self.message,
            self.previous_state,
            self.new_state,
        );
        if let Some(error) = &self.error {
            line.push_str(&format!(" [{}] {}", error.code(), error));
        }
        line
    }
}

/// Free-form operator message not tied to one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosMessage {
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
    pub timestamp: DateTime<Utc>,
}

impl ChaosMessage {
    pub fn new(title: impl Into<String>, message: impl Into<String>, level: NotificationLevel) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChaosNotification {
    Experiment(ChaosExperimentEvent),
    Message(ChaosMessage),
}

impl ChaosNotification {
    pub fn level(&self) -> NotificationLevel {
        match self {
            ChaosNotification::Experiment(event) => event.level,
            ChaosNotification::Message(message) => message.level,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChaosNotification::Experiment(event) => event.timestamp,
            ChaosNotification::Message(message) => message.timestamp,
        }
    }

    pub fn render(&self) -> String {
        match self {
            ChaosNotification::Experiment(event) => event.render(),
            ChaosNotification::Message(message) => {
                format!("{}: {}", message.title, message.message)
            }
        }
    }

    pub fn as_experiment_event(&self) -> Option<&ChaosExperimentEvent> {
        match self {
            ChaosNotification::Experiment(event) => Some(event),
            ChaosNotification::Message(_) => None,
        }
    }
}

impl From<ChaosExperimentEvent> for ChaosNotification {
    fn from(event: ChaosExperimentEvent) -> Self {
        ChaosNotification::Experiment(event)
    }
}

impl From<ChaosMessage> for ChaosNotification {
    fn from(message: ChaosMessage) -> Self {
        ChaosNotification::Message(message)
    }
}
