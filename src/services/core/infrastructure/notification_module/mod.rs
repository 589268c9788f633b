// src/services/core/infrastructure/notification_module/mod.rs

//! Notification Module - lifecycle events and operator messages
//!
//! Experiments and the admin gate publish [`ChaosNotification`]s through a
//! [`NotificationManager`], which fans them out to every registered
//! [`NotificationSink`]. Delivery failures are logged and never propagate back
//! into the experiment lifecycle.

use async_trait::async_trait;

use crate::utils::ChaosResult;

pub mod chaos_event;
pub mod console_channel;
pub mod delivery_manager;
pub mod notification_coordinator;

pub use chaos_event::{ChaosExperimentEvent, ChaosMessage, ChaosNotification};
pub use console_channel::ConsoleNotification;
pub use delivery_manager::{BufferedNotificationSink, NotificationTransport, RetryConfig};
pub use notification_coordinator::{NotificationManager, NotificationStats};

/// Destination for chaos notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &ChaosNotification) -> ChaosResult<()>;

    /// Push out anything queued. Unbuffered sinks have nothing to do.
    async fn flush(&self) -> ChaosResult<()> {
        Ok(())
    }
}
