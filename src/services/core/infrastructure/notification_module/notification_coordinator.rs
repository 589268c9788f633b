// src/services/core/infrastructure/notification_module/notification_coordinator.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::{ChaosMessage, ChaosNotification, NotificationSink};
use crate::types::NotificationLevel;

/// Delivery counters across all sinks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStats {
    pub notifications_sent: u64,
    pub delivery_failures: u64,
    pub flush_failures: u64,
}

/// Fans notifications out to every registered sink.
///
/// The sink list lock is only held to clone the list; sends happen outside it.
#[derive(Default)]
pub struct NotificationManager {
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
    notifications_sent: AtomicU64,
    delivery_failures: AtomicU64,
    flush_failures: AtomicU64,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(self, sink: Arc<dyn NotificationSink>) -> Self {
        self.register(sink);
        self
    }

    pub fn register(&self, sink: Arc<dyn NotificationSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn NotificationSink>> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn send(&self, notification: ChaosNotification) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        for sink in self.snapshot() {
            if let Err(e) = sink.send(&notification).await {
                self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Notification sink {} failed to send: {}", sink.name(), e);
            }
        }
    }

    pub async fn send_message(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
        level: NotificationLevel,
    ) {
        self.send(ChaosMessage::new(title, message, level).into()).await;
    }

    /// Flush every buffered sink. Called periodically by the driver.
    pub async fn flush_buffers(&self) {
        for sink in self.snapshot() {
            if let Err(e) = sink.flush().await {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Notification sink {} failed to flush: {}", sink.name(), e);
            }
        }
    }

    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }
}
