// src/services/core/infrastructure/chaos_engineering/experiment_engine.rs

//! Experiment Engine
//!
//! One [`Experiment`] binds a selected method to a target container and walks
//! it through CREATED, STARTING, STARTED, SELF_HEALING, FINALIZING and on to
//! FINISHED or FAILED. Every call to [`Experiment::advance`] evaluates the
//! current state once against the injected clock; timeouts are elapsed-time
//! comparisons, not timers.
//!
//! Only the task holding `&mut Experiment` changes it. Readers use the
//! [`ExperimentSnapshot`] published after every mutation.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::container::Container;
use super::experiment_method::{CallbackFn, ExperimentHandle, ExperimentMethod, HealthCheckFn};
use super::experiment_state::ExperimentState;
use super::ExperimentTimingConfig;
use crate::services::core::admin::{AdminGate, AdminState};
use crate::services::core::infrastructure::notification_module::{
    ChaosExperimentEvent, NotificationManager,
};
use crate::types::{ContainerHealth, ExperimentType, NotificationLevel};
use crate::utils::error::{ChaosError, ChaosResult, ExperimentFailure};
use crate::utils::time::{Clock, SystemClock};

/// Why a due self-healing attempt did not run this tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SelfHealingBlock {
    AdminState { state: AdminState },
    Interval { remaining_seconds: i64 },
}

/// Point-in-time copy of an experiment for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub id: Uuid,
    pub target_identity: String,
    pub target_name: String,
    pub container_type: String,
    pub aggregation_identifier: String,
    pub method_name: String,
    pub experiment_type: ExperimentType,
    pub state: ExperimentState,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_transition_time: DateTime<Utc>,
    pub last_self_healing_time: Option<DateTime<Utc>>,
    pub self_healing_attempts: u32,
    pub last_health: Option<ContainerHealth>,
    pub last_error: Option<ExperimentFailure>,
    pub blocked: Option<SelfHealingBlock>,
}

enum HealthOutcome {
    Normal,
    NotNormal,
    Missing,
}

pub struct Experiment {
    id: Uuid,
    container: Weak<dyn Container>,
    target_identity: String,
    target_name: String,
    container_type: String,
    aggregation_identifier: String,
    method: ExperimentMethod,
    state: ExperimentState,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    last_transition_time: DateTime<Utc>,
    last_self_healing_time: Option<DateTime<Utc>>,
    finalizing_since: Option<DateTime<Utc>>,
    finalization_window_start: Option<DateTime<Utc>>,
    minimum_duration: Duration,
    maximum_duration: Duration,
    finalization_duration: Duration,
    finalization_timeout: Duration,
    self_healing_interval: Duration,
    maximum_self_healing_retries: u32,
    self_healing_attempts: u32,
    handle: ExperimentHandle,
    health_check: Option<HealthCheckFn>,
    self_healing: Option<CallbackFn>,
    finalize: Option<CallbackFn>,
    last_health: Option<ContainerHealth>,
    last_error: Option<ExperimentFailure>,
    blocked: Option<SelfHealingBlock>,
    snapshot: Arc<RwLock<ExperimentSnapshot>>,
    admin: Arc<dyn AdminGate>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
}

impl Experiment {
    pub fn builder(container: &Arc<dyn Container>, method: ExperimentMethod) -> ExperimentBuilder {
        ExperimentBuilder {
            container: container.clone(),
            method,
            timing: ExperimentTimingConfig::default(),
            admin: None,
            notifications: None,
            clock: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    pub fn target_identity(&self) -> &str {
        &self.target_identity
    }

    pub fn aggregation_identifier(&self) -> &str {
        &self.aggregation_identifier
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    pub fn experiment_type(&self) -> ExperimentType {
        self.method.experiment_type()
    }

    pub fn self_healing_attempts(&self) -> u32 {
        self.self_healing_attempts
    }

    pub fn last_error(&self) -> Option<&ExperimentFailure> {
        self.last_error.as_ref()
    }

    pub fn blocked(&self) -> Option<&SelfHealingBlock> {
        self.blocked.as_ref()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn minimum_duration(&self) -> Duration {
        self.minimum_duration
    }

    pub fn maximum_duration(&self) -> Duration {
        self.maximum_duration
    }

    pub fn finalization_duration(&self) -> Duration {
        self.finalization_duration
    }

    /// The target, if its owner still holds it
    pub fn container(&self) -> Option<Arc<dyn Container>> {
        self.container.upgrade()
    }

    /// Shared snapshot cell, readable without touching the experiment
    pub fn snapshot_handle(&self) -> Arc<RwLock<ExperimentSnapshot>> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Evaluate the current state once and return the resulting state.
    pub async fn advance(&mut self) -> ExperimentState {
        match self.state {
            ExperimentState::Created => self.start().await,
            ExperimentState::Started => self.evaluate_started().await,
            ExperimentState::SelfHealing => self.evaluate_self_healing().await,
            ExperimentState::Finalizing => self.evaluate_finalizing().await,
            // STARTING only exists inside start(); terminal states are final
            ExperimentState::Starting | ExperimentState::Finished | ExperimentState::Failed => {}
        }
        self.publish_snapshot();
        self.state
    }

    /// Fail an experiment whose advancing task panicked inside a callback.
    pub async fn fail_after_panic(&mut self, reason: impl Into<String>) {
        if self.state.is_complete() {
            return;
        }
        let reason = reason.into();
        let failure = match self.state {
            ExperimentState::Created | ExperimentState::Starting => {
                ExperimentFailure::StartFailure(reason)
            }
            ExperimentState::Finalizing => ExperimentFailure::FinalizationError(reason),
            _ => ExperimentFailure::SelfHealingError(reason),
        };
        self.fail(failure).await;
    }

    async fn start(&mut self) {
        let container = match self.container.upgrade() {
            Some(container) => container,
            None => return self.fail(ExperimentFailure::TargetMissing).await,
        };

        if !self.admin.can_run_experiments() {
            let state = self.admin.admin_state();
            return self
                .fail(ExperimentFailure::AdminBlocked(state.to_string()))
                .await;
        }

        match container.container_health(self.experiment_type()).await {
            Ok(ContainerHealth::Normal) => {}
            Ok(ContainerHealth::DoesNotExist) => {
                return self.fail(ExperimentFailure::TargetMissing).await
            }
            Ok(ContainerHealth::RunningExperiment) => {
                return self.fail(ExperimentFailure::TargetUnhealthy).await
            }
            Err(e) => {
                log::error!(
                    "Pre-start health check for {} failed: {}",
                    self.target_name,
                    e
                );
                return self.fail(ExperimentFailure::TargetUnhealthy).await;
            }
        }

        self.start_time = Some(self.clock.now());
        self.transition_to(ExperimentState::Starting, None).await;

        let experiment_type = self.experiment_type();
        if !container.clone().supports_experiment_type(experiment_type) {
            return self
                .fail(ExperimentFailure::MethodNotAvailable(experiment_type))
                .await;
        }
        drop(container);

        if let Err(e) = self.method.invoke(self.handle.clone()).await {
            log::error!(
                "Experiment method {} failed to start on {}: {}",
                self.method.name(),
                self.target_name,
                e
            );
            return self
                .fail(ExperimentFailure::StartFailure(e.to_string()))
                .await;
        }

        self.capture_callbacks();
        self.transition_to(ExperimentState::Started, None).await;
    }

    fn capture_callbacks(&mut self) {
        self.health_check = Some(
            self.handle
                .health_check()
                .unwrap_or_else(|| container_health_check(self.container.clone(), self.experiment_type())),
        );
        self.self_healing = self.handle.self_healing();
        self.finalize = self.handle.finalize();

        let (minimum, maximum, finalization) = self.handle.duration_overrides();
        if let Some(minimum) = minimum {
            self.minimum_duration = minimum;
        }
        if let Some(maximum) = maximum {
            self.maximum_duration = maximum;
        }
        if let Some(finalization) = finalization {
            self.finalization_duration = finalization;
        }
        if self.minimum_duration > self.maximum_duration {
            log::warn!(
                "Minimum duration above maximum for {}; using maximum for both",
                self.method.name()
            );
            self.minimum_duration = self.maximum_duration;
        }
    }

    fn elapsed_since_start(&self, now: DateTime<Utc>) -> Duration {
        self.start_time.map_or_else(Duration::zero, |start| now - start)
    }

    async fn evaluate_started(&mut self) {
        let now = self.clock.now();
        let elapsed = self.elapsed_since_start(now);
        let abort = self.admin.must_run_self_healing();

        match self.check_trusted_health(now).await {
            HealthOutcome::Missing => self.fail(ExperimentFailure::TargetMissing).await,
            HealthOutcome::Normal => self.enter_finalizing(now).await,
            HealthOutcome::NotNormal => {
                if abort || elapsed > self.maximum_duration {
                    self.attempt_self_healing(now).await;
                }
            }
        }
    }

    async fn evaluate_self_healing(&mut self) {
        let now = self.clock.now();
        match self.check_trusted_health(now).await {
            HealthOutcome::Missing => self.fail(ExperimentFailure::TargetMissing).await,
            HealthOutcome::Normal => self.enter_finalizing(now).await,
            HealthOutcome::NotNormal => self.attempt_self_healing(now).await,
        }
    }

    async fn attempt_self_healing(&mut self, now: DateTime<Utc>) {
        let admin_state = self.admin.admin_state();
        if !self.admin.can_run_self_healing() && !self.admin.must_run_self_healing() {
            if self.blocked.is_none() {
                log::info!(
                    "Self-healing for {} deferred while admin state is {}",
                    self.target_name,
                    admin_state
                );
            }
            self.blocked = Some(SelfHealingBlock::AdminState { state: admin_state });
            return;
        }

        if let Some(last) = self.last_self_healing_time {
            let since_last = now - last;
            if since_last < self.self_healing_interval {
                self.blocked = Some(SelfHealingBlock::Interval {
                    remaining_seconds: (self.self_healing_interval - since_last).num_seconds(),
                });
                return;
            }
        }

        if self.self_healing_attempts >= self.maximum_self_healing_retries {
            return self
                .fail(ExperimentFailure::MaximumSelfHealingRetriesReached(
                    self.self_healing_attempts,
                ))
                .await;
        }

        self.blocked = None;
        self.self_healing_attempts += 1;
        self.last_self_healing_time = Some(now);
        log::info!(
            "Running self-healing attempt {} of {} for {}",
            self.self_healing_attempts,
            self.maximum_self_healing_retries,
            self.target_name
        );

        // Without a registered callback an attempt only waits for the target to recover
        match self.self_healing.clone() {
            Some(heal) => {
                if let Err(e) = heal().await {
                    log::error!("Self-healing for {} failed: {}", self.target_name, e);
                    return self
                        .fail(ExperimentFailure::SelfHealingError(e.to_string()))
                        .await;
                }
            }
            None => log::debug!(
                "No self-healing registered for {}; waiting for recovery",
                self.target_name
            ),
        }

        if self.state == ExperimentState::Started {
            self.transition_to(ExperimentState::SelfHealing, None).await;
        } else {
            self.publish_snapshot();
            let event = self.event(
                self.state,
                format!("Self-healing attempt {}", self.self_healing_attempts),
                NotificationLevel::Warn,
            );
            self.notifications.send(event.into()).await;
        }

        let now = self.clock.now();
        match self.check_trusted_health(now).await {
            HealthOutcome::Normal => self.enter_finalizing(now).await,
            HealthOutcome::Missing => self.fail(ExperimentFailure::TargetMissing).await,
            HealthOutcome::NotNormal => {
                if self.self_healing_attempts >= self.maximum_self_healing_retries {
                    self.fail(ExperimentFailure::MaximumSelfHealingRetriesReached(
                        self.self_healing_attempts,
                    ))
                    .await;
                }
            }
        }
    }

    async fn enter_finalizing(&mut self, now: DateTime<Utc>) {
        self.blocked = None;
        self.finalizing_since = Some(now);
        self.finalization_window_start = Some(now);
        self.transition_to(ExperimentState::Finalizing, None).await;
    }

    async fn evaluate_finalizing(&mut self) {
        let now = self.clock.now();
        let since = *self.finalizing_since.get_or_insert(now);
        let window_start = *self.finalization_window_start.get_or_insert(now);

        match self.check_health().await {
            HealthOutcome::Missing => return self.fail(ExperimentFailure::TargetMissing).await,
            HealthOutcome::NotNormal => {
                log::warn!(
                    "Health of {} dropped while finalizing; restarting finalization window",
                    self.target_name
                );
                self.finalization_window_start = Some(now);
            }
            HealthOutcome::Normal => {
                if now - window_start >= self.finalization_duration {
                    return self.finish().await;
                }
            }
        }

        if now - since > self.finalization_timeout {
            self.fail(ExperimentFailure::FinalizationTimeout(
                self.finalization_timeout.num_seconds().max(0) as u64,
            ))
            .await;
        }
    }

    async fn finish(&mut self) {
        if let Some(finalize) = self.finalize.clone() {
            if let Err(e) = finalize().await {
                log::error!("Finalization for {} failed: {}", self.target_name, e);
                return self
                    .fail(ExperimentFailure::FinalizationError(e.to_string()))
                    .await;
            }
        }
        self.transition_to(ExperimentState::Finished, None).await;
    }

    /// Health the lifecycle may act on. A normal reading inside the minimum
    /// duration is not trusted yet.
    async fn check_trusted_health(&mut self, now: DateTime<Utc>) -> HealthOutcome {
        match self.check_health().await {
            HealthOutcome::Normal if self.elapsed_since_start(now) <= self.minimum_duration => {
                HealthOutcome::NotNormal
            }
            outcome => outcome,
        }
    }

    async fn check_health(&mut self) -> HealthOutcome {
        if self.container.strong_count() == 0 {
            self.last_health = Some(ContainerHealth::DoesNotExist);
            return HealthOutcome::Missing;
        }

        let check = match &self.health_check {
            Some(check) => check.clone(),
            None => container_health_check(self.container.clone(), self.experiment_type()),
        };

        match check().await {
            Ok(health) => {
                self.last_health = Some(health);
                match health {
                    ContainerHealth::Normal => HealthOutcome::Normal,
                    ContainerHealth::RunningExperiment => HealthOutcome::NotNormal,
                    ContainerHealth::DoesNotExist => HealthOutcome::Missing,
                }
            }
            Err(e) => {
                log::error!("Health check for {} returned an error: {}", self.target_name, e);
                self.last_health = None;
                let event = self.event(
                    self.state,
                    format!("Health check error: {}", e),
                    NotificationLevel::Warn,
                );
                self.notifications.send(event.into()).await;
                HealthOutcome::NotNormal
            }
        }
    }

    async fn fail(&mut self, failure: ExperimentFailure) {
        self.transition_to(ExperimentState::Failed, Some(failure)).await;
    }

    async fn transition_to(&mut self, next: ExperimentState, failure: Option<ExperimentFailure>) {
        let previous = self.state;
        let (next, failure) = if previous.can_transition_to(next) {
            (next, failure)
        } else {
            log::error!(
                "Experiment {} attempted invalid transition {} -> {}",
                self.id,
                previous,
                next
            );
            if previous.is_complete() {
                return;
            }
            let invalid = ExperimentFailure::InvalidTransition(format!("{} -> {}", previous, next));
            (ExperimentState::Failed, Some(invalid))
        };

        self.state = next;
        self.last_transition_time = self.clock.now();
        if failure.is_some() {
            self.last_error = failure;
        }
        self.publish_snapshot();

        let (message, level) = match next {
            ExperimentState::Starting => ("Starting experiment".to_string(), NotificationLevel::Good),
            ExperimentState::Started => ("Experiment started".to_string(), NotificationLevel::Warn),
            ExperimentState::SelfHealing => (
                format!("Self-healing attempt {}", self.self_healing_attempts),
                NotificationLevel::Warn,
            ),
            ExperimentState::Finalizing => {
                ("Container healthy, finalizing".to_string(), NotificationLevel::Good)
            }
            ExperimentState::Finished => ("Experiment finished".to_string(), NotificationLevel::Good),
            ExperimentState::Failed => ("Experiment failed".to_string(), NotificationLevel::Error),
            ExperimentState::Created => ("Experiment created".to_string(), NotificationLevel::Good),
        };
        log::info!(
            "Experiment {} on {} ({}): {} -> {}",
            self.id,
            self.target_name,
            self.method.name(),
            previous,
            next
        );

        let mut event = self.event(previous, message, level);
        event.new_state = next;
        self.notifications.send(event.into()).await;
    }

    fn event(
        &self,
        previous_state: ExperimentState,
        message: String,
        level: NotificationLevel,
    ) -> ChaosExperimentEvent {
        ChaosExperimentEvent {
            experiment_id: self.id,
            target_identity: self.target_identity.clone(),
            target_name: self.target_name.clone(),
            container_type: self.container_type.clone(),
            method_name: self.method.name().to_string(),
            experiment_type: self.experiment_type(),
            previous_state,
            new_state: self.state,
            timestamp: self.clock.now(),
            message,
            level,
            error: if self.state == ExperimentState::Failed {
                self.last_error.clone()
            } else {
                None
            },
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = ExperimentSnapshot {
            id: self.id,
            target_identity: self.target_identity.clone(),
            target_name: self.target_name.clone(),
            container_type: self.container_type.clone(),
            aggregation_identifier: self.aggregation_identifier.clone(),
            method_name: self.method.name().to_string(),
            experiment_type: self.experiment_type(),
            state: self.state,
            created_at: self.created_at,
            start_time: self.start_time,
            last_transition_time: self.last_transition_time,
            last_self_healing_time: self.last_self_healing_time,
            self_healing_attempts: self.self_healing_attempts,
            last_health: self.last_health,
            last_error: self.last_error.clone(),
            blocked: self.blocked.clone(),
        };
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Default health check: ask the container directly.
fn container_health_check(
    container: Weak<dyn Container>,
    experiment_type: ExperimentType,
) -> HealthCheckFn {
    Arc::new(
        move || -> BoxFuture<'static, ChaosResult<ContainerHealth>> {
            let container = container.clone();
            Box::pin(async move {
                match container.upgrade() {
                    Some(container) => container.container_health(experiment_type).await,
                    None => Ok(ContainerHealth::DoesNotExist),
                }
            })
        },
    )
}

pub struct ExperimentBuilder {
    container: Arc<dyn Container>,
    method: ExperimentMethod,
    timing: ExperimentTimingConfig,
    admin: Option<Arc<dyn AdminGate>>,
    notifications: Option<Arc<NotificationManager>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ExperimentBuilder {
    pub fn with_timing(mut self, timing: ExperimentTimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_admin_gate(mut self, admin: Arc<dyn AdminGate>) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn with_notifications(mut self, notifications: Arc<NotificationManager>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> ChaosResult<Experiment> {
        let admin = self
            .admin
            .ok_or_else(|| ChaosError::config_error("Experiment needs an admin gate"))?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let notifications = self
            .notifications
            .unwrap_or_else(|| Arc::new(NotificationManager::new()));

        let descriptor = self.method.descriptor();
        descriptor.validate()?;
        let timing = &self.timing;
        let minimum_duration = Duration::seconds(
            descriptor
                .minimum_duration_seconds
                .unwrap_or(timing.minimum_duration_seconds) as i64,
        );
        let maximum_duration = Duration::seconds(
            descriptor
                .maximum_duration_seconds
                .unwrap_or(timing.maximum_duration_seconds) as i64,
        );

        let id = Uuid::new_v4();
        let now = clock.now();
        let handle = ExperimentHandle::new(id, self.method.name());

        let snapshot = ExperimentSnapshot {
            id,
            target_identity: self.container.identity(),
            target_name: self.container.simple_name(),
            container_type: self.container.container_type().to_string(),
            aggregation_identifier: self.container.aggregation_identifier(),
            method_name: self.method.name().to_string(),
            experiment_type: self.method.experiment_type(),
            state: ExperimentState::Created,
            created_at: now,
            start_time: None,
            last_transition_time: now,
            last_self_healing_time: None,
            self_healing_attempts: 0,
            last_health: None,
            last_error: None,
            blocked: None,
        };

        Ok(Experiment {
            id,
            container: Arc::downgrade(&self.container),
            target_identity: snapshot.target_identity.clone(),
            target_name: snapshot.target_name.clone(),
            container_type: snapshot.container_type.clone(),
            aggregation_identifier: snapshot.aggregation_identifier.clone(),
            method: self.method,
            state: ExperimentState::Created,
            created_at: now,
            start_time: None,
            last_transition_time: now,
            last_self_healing_time: None,
            finalizing_since: None,
            finalization_window_start: None,
            minimum_duration: minimum_duration.min(maximum_duration),
            maximum_duration,
            finalization_duration: Duration::seconds(timing.finalization_duration_seconds as i64),
            finalization_timeout: Duration::seconds(timing.finalization_timeout_seconds as i64),
            self_healing_interval: Duration::seconds(timing.self_healing_interval_seconds as i64),
            maximum_self_healing_retries: timing.maximum_self_healing_retries,
            self_healing_attempts: 0,
            handle,
            health_check: None,
            self_healing: None,
            finalize: None,
            last_health: None,
            last_error: None,
            blocked: None,
            snapshot: Arc::new(RwLock::new(snapshot)),
            admin,
            notifications,
            clock,
        })
    }
}
