// src/services/core/infrastructure/notification_module/console_channel.rs

use async_trait::async_trait;

use super::{ChaosNotification, NotificationSink};
use crate::types::NotificationLevel;
use crate::utils::ChaosResult;

/// Writes every notification to the process log.
#[derive(Debug, Default, Clone)]
pub struct ConsoleNotification;

impl ConsoleNotification {
    pub fn new() -> Self {
        ConsoleNotification
    }
}

#[async_trait]
impl NotificationSink for ConsoleNotification {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, notification: &ChaosNotification) -> ChaosResult<()> {
        let rendered = notification.render();
        match notification.level() {
            NotificationLevel::Good => log::info!("{}", rendered),
            NotificationLevel::Warn => log::warn!("{}", rendered),
            NotificationLevel::Error => log::error!("{}", rendered),
        }
        Ok(())
    }
}
