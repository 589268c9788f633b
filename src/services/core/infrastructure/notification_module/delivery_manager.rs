// src/services/core/infrastructure/notification_module/delivery_manager.rs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChaosNotification, NotificationSink};
use crate::utils::error::{codes, ChaosError, ChaosResult, ErrorKind};

/// Force a flush once more than this many notifications are queued
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50;

const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

/// Batch delivery endpoint behind a [`BufferedNotificationSink`], e.g. a chat webhook.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, batch: &[ChaosNotification]) -> ChaosResult<()>;
}

/// Exponential backoff for failed batch deliveries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_delay_millis: u64,
    pub backoff_multiplier: f64,
    pub max_delay_millis: u64,
    /// Stop retrying once this much time has passed since the first attempt
    pub max_elapsed_millis: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_millis: 1_000,
            backoff_multiplier: GOLDEN_RATIO,
            max_delay_millis: 10_000,
            max_elapsed_millis: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt_number` (1-based).
    pub fn calculate_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1) as i32;
        let delay = self.initial_delay_millis as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_millis as f64) as u64)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_millis)
    }
}

/// Queues notifications and delivers them in batches.
///
/// A flush drains the queue and retries the transport with [`RetryConfig`]
/// backoff. A batch that still fails once the retry budget is spent is
/// dropped and reported with error code 18202.
///
/// `send` only queues while the queue is at or below the flush threshold;
/// routine delivery belongs to the driver's flush tick. Past the threshold
/// `send` flushes inline, so a failing transport holds that caller for up
/// to the whole retry budget and the error is returned from `send`.
pub struct BufferedNotificationSink {
    name: String,
    transport: Arc<dyn NotificationTransport>,
    queue: Mutex<VecDeque<ChaosNotification>>,
    flush_lock: tokio::sync::Mutex<()>,
    flush_threshold: usize,
    retry_config: RetryConfig,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BufferedNotificationSink {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self {
            name: format!("buffered:{}", transport.name()),
            transport,
            queue: Mutex::new(VecDeque::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            retry_config: RetryConfig::default(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_flush_threshold(mut self, flush_threshold: usize) -> Self {
        self.flush_threshold = flush_threshold;
        self
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drain(&self) -> Vec<ChaosNotification> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    async fn deliver_with_retry(&self, batch: &[ChaosNotification]) -> ChaosResult<()> {
        let started = tokio::time::Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match self.transport.deliver(batch).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let elapsed = started.elapsed();
            let budget = self.retry_config.max_elapsed();
            if elapsed >= budget {
                return Err(ChaosError::new(
                    ErrorKind::NotificationError,
                    format!(
                        "Gave up delivering {} notifications via {} after {} attempts: {}",
                        batch.len(),
                        self.transport.name(),
                        attempt,
                        error
                    ),
                )
                .with_code(codes::NOTIFICATION_BUFFER_RETRY_EXCEEDED));
            }

            let delay = self
                .retry_config
                .calculate_delay(attempt)
                .min(budget - elapsed);
            log::warn!(
                "Delivery via {} failed (attempt {}), retrying in {:?}: {}",
                self.transport.name(),
                attempt,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NotificationSink for BufferedNotificationSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &ChaosNotification) -> ChaosResult<()> {
        let queued = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.push_back(notification.clone());
            queue.len()
        };

        if queued > self.flush_threshold {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&self) -> ChaosResult<()> {
        // One flush at a time keeps batches ordered.
        let _guard = self.flush_lock.lock().await;

        let batch = self.drain();
        if batch.is_empty() {
            return Ok(());
        }

        match self.deliver_with_retry(&batch).await {
            Ok(()) => {
                self.delivered.fetch_add(batch.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}
