// src/services/core/admin/admin_state.rs

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::services::core::infrastructure::notification_module::NotificationManager;
use crate::types::NotificationLevel;
use crate::utils::error::{ChaosError, ChaosResult};
use crate::utils::time::Clock;

/// Operational state of the whole engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminState {
    Starting,
    Started,
    Paused,
    Drain,
    Abort,
}

impl AdminState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminState::Starting => "STARTING",
            AdminState::Started => "STARTED",
            AdminState::Paused => "PAUSED",
            AdminState::Drain => "DRAIN",
            AdminState::Abort => "ABORT",
        }
    }

    pub fn allows_experiments(&self) -> bool {
        matches!(self, AdminState::Started)
    }

    pub fn allows_self_healing(&self) -> bool {
        matches!(self, AdminState::Started | AdminState::Drain | AdminState::Abort)
    }

    pub fn forces_self_healing(&self) -> bool {
        matches!(self, AdminState::Abort)
    }

    /// Nothing ever goes back to STARTING; every other move is allowed.
    pub fn can_transition_to(&self, next: AdminState) -> bool {
        next != AdminState::Starting
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AdminState {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STARTING" => Ok(AdminState::Starting),
            "STARTED" => Ok(AdminState::Started),
            "PAUSED" => Ok(AdminState::Paused),
            "DRAIN" => Ok(AdminState::Drain),
            "ABORT" => Ok(AdminState::Abort),
            other => Err(ChaosError::validation_error(format!(
                "Unknown admin state: {}",
                other
            ))),
        }
    }
}

/// Gate consulted before starting experiments and running self-healing.
pub trait AdminGate: Send + Sync {
    fn admin_state(&self) -> AdminState;

    fn can_run_experiments(&self) -> bool {
        self.admin_state().allows_experiments()
    }

    fn can_run_self_healing(&self) -> bool {
        self.admin_state().allows_self_healing()
    }

    fn must_run_self_healing(&self) -> bool {
        self.admin_state().forces_self_healing()
    }
}

#[derive(Debug, Clone, Copy)]
struct StateRecord {
    state: AdminState,
    since: DateTime<Utc>,
}

/// Holds the admin state and announces changes.
pub struct AdminManager {
    record: RwLock<StateRecord>,
    clock: Arc<dyn Clock>,
    notifications: Option<Arc<NotificationManager>>,
}

impl AdminManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let since = clock.now();
        Self {
            record: RwLock::new(StateRecord {
                state: AdminState::Starting,
                since,
            }),
            clock,
            notifications: None,
        }
    }

    pub fn with_notifications(mut self, notifications: Arc<NotificationManager>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Change state. Returns `true` if the state actually changed.
    pub async fn set_admin_state(&self, next: AdminState) -> ChaosResult<bool> {
        let previous = {
            let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
            if record.state == next {
                return Ok(false);
            }
            if !record.state.can_transition_to(next) {
                return Err(ChaosError::invalid_state(format!(
                    "Cannot transition admin state from {} to {}",
                    record.state, next
                )));
            }
            let previous = record.state;
            record.state = next;
            record.since = self.clock.now();
            previous
        };

        log::info!("Admin state changed from {} to {}", previous, next);
        if let Some(notifications) = &self.notifications {
            let level = match next {
                AdminState::Started => NotificationLevel::Good,
                AdminState::Abort => NotificationLevel::Error,
                _ => NotificationLevel::Warn,
            };
            notifications
                .send_message(
                    "Admin state change",
                    format!("State changed from {} to {}", previous, next),
                    level,
                )
                .await;
        }
        Ok(true)
    }

    /// Move out of STARTING once the engine is wired up. No-op otherwise.
    pub async fn startup_complete(&self) -> ChaosResult<()> {
        if self.admin_state() == AdminState::Starting {
            self.set_admin_state(AdminState::Started).await?;
        }
        Ok(())
    }

    pub fn state_since(&self) -> DateTime<Utc> {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .since
    }

    pub fn time_in_state(&self) -> Duration {
        self.clock.now() - self.state_since()
    }
}

impl AdminGate for AdminManager {
    fn admin_state(&self) -> AdminState {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }
}
