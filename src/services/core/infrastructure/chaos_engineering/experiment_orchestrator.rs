// src/services/core/infrastructure/chaos_engineering/experiment_orchestrator.rs

//! Experiment Orchestrator
//!
//! The driver: decides when a new experiment wave starts, creates the
//! experiments and advances every live one on a bounded worker pool until it
//! reaches a terminal state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use super::chaos_scheduler::ChaosScheduler;
use super::container::Container;
use super::experiment_engine::{Experiment, ExperimentSnapshot};
use super::experiment_method::ExperimentMethod;
use super::experiment_state::ExperimentState;
use super::experiment_suite::{ExperimentCriteria, ExperimentSuite};
use super::method_selector::ExperimentMethodSelector;
use super::platform::{Platform, ScheduledPlatform};
use super::ChaosEngineeringConfig;
use crate::services::core::admin::AdminGate;
use crate::services::core::calendar::HolidayManager;
use crate::services::core::infrastructure::notification_module::NotificationManager;
use crate::utils::error::{ChaosError, ChaosResult};
use crate::utils::logger::Logger;
use crate::utils::time::Clock;

/// Containers of an aggregation that must be left untouched by a suite
const MINIMUM_SURVIVORS: usize = 1;

/// Most recent suites kept in the history
const SUITE_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationStats {
    pub experiments_started: u64,
    pub experiments_finished: u64,
    pub experiments_failed: u64,
    pub active_experiments: usize,
    pub active_by_state: HashMap<ExperimentState, usize>,
    pub last_experiment_complete: Option<DateTime<Utc>>,
}

struct TrackedExperiment {
    experiment: Arc<tokio::sync::Mutex<Experiment>>,
    snapshot: Arc<RwLock<ExperimentSnapshot>>,
    platform_type: String,
}

impl TrackedExperiment {
    fn snapshot(&self) -> ExperimentSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct ExperimentOrchestrator {
    config: ChaosEngineeringConfig,
    platforms: Vec<Arc<ScheduledPlatform>>,
    admin: Arc<dyn AdminGate>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    selector: ExperimentMethodSelector,
    holidays: Option<Arc<HolidayManager>>,
    experiments: Mutex<HashMap<Uuid, TrackedExperiment>>,
    workers: Arc<Semaphore>,
    wave_lock: tokio::sync::Mutex<()>,
    last_experiment_complete: Mutex<Option<DateTime<Utc>>>,
    suite_history: Mutex<VecDeque<(DateTime<Utc>, ExperimentSuite)>>,
    rng: Mutex<StdRng>,
    experiments_started: AtomicU64,
    experiments_finished: AtomicU64,
    experiments_failed: AtomicU64,
    logger: Logger,
}

impl ExperimentOrchestrator {
    pub fn new(
        config: ChaosEngineeringConfig,
        admin: Arc<dyn AdminGate>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let selector = ExperimentMethodSelector::new(config.preferred_experiment.clone());
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            config,
            platforms: Vec::new(),
            admin,
            notifications,
            clock,
            selector,
            holidays: None,
            experiments: Mutex::new(HashMap::new()),
            workers,
            wave_lock: tokio::sync::Mutex::new(()),
            last_experiment_complete: Mutex::new(None),
            suite_history: Mutex::new(VecDeque::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            experiments_started: AtomicU64::new(0),
            experiments_finished: AtomicU64::new(0),
            experiments_failed: AtomicU64::new(0),
            logger: Logger::from_env(),
        }
    }

    pub fn with_holiday_manager(mut self, holidays: Arc<HolidayManager>) -> Self {
        self.holidays = Some(holidays);
        self
    }

    pub fn with_selector(mut self, selector: ExperimentMethodSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_scheduled_platform(mut self, platform: ScheduledPlatform) -> Self {
        self.platforms.push(Arc::new(platform));
        self
    }

    /// Register a platform, scheduling it against the holiday calendar.
    pub fn with_platform(self, platform: Arc<dyn Platform>) -> ChaosResult<Self> {
        let holidays = self.holidays.clone().ok_or_else(|| {
            ChaosError::config_error("A holiday manager is required to schedule platforms")
        })?;
        let average = platform
            .average_millis_between_experiments()
            .unwrap_or(self.config.average_millis_between_experiments);
        let scheduler = ChaosScheduler::builder()
            .with_average_millis_between_experiments(average)
            .with_working_time_oracle(holidays)
            .with_clock(self.clock.clone())
            .build()?;
        let scheduled = ScheduledPlatform::new(platform, scheduler, &self.config, self.clock.clone());
        Ok(self.with_scheduled_platform(scheduled))
    }

    pub fn config(&self) -> &ChaosEngineeringConfig {
        &self.config
    }

    pub fn platforms(&self) -> &[Arc<ScheduledPlatform>] {
        &self.platforms
    }

    pub fn platform(&self, platform_type: &str) -> Option<Arc<ScheduledPlatform>> {
        self.platforms
            .iter()
            .find(|p| p.platform_type() == platform_type)
            .cloned()
    }

    fn lock_experiments(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, TrackedExperiment>> {
        self.experiments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_active_experiments(&self) -> bool {
        !self.lock_experiments().is_empty()
    }

    pub fn get_experiment(&self, id: &Uuid) -> Option<ExperimentSnapshot> {
        self.lock_experiments().get(id).map(TrackedExperiment::snapshot)
    }

    pub fn active_experiments(&self) -> Vec<ExperimentSnapshot> {
        self.lock_experiments()
            .values()
            .map(TrackedExperiment::snapshot)
            .collect()
    }

    /// Suites of past waves, most recent first
    pub fn historical_suites(&self) -> Vec<(DateTime<Utc>, ExperimentSuite)> {
        self.suite_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn last_experiment_complete(&self) -> Option<DateTime<Utc>> {
        *self
            .last_experiment_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_backoff_period(&self) -> bool {
        let backoff = Duration::seconds(self.config.experiment_backoff_seconds as i64);
        self.last_experiment_complete()
            .map_or(false, |complete| complete + backoff > self.clock.now())
    }

    pub fn statistics(&self) -> OrchestrationStats {
        let mut active_by_state: HashMap<ExperimentState, usize> =
            ExperimentState::ALL.iter().map(|state| (*state, 0)).collect();
        let active = self.active_experiments();
        for snapshot in &active {
            *active_by_state.entry(snapshot.state).or_default() += 1;
        }
        OrchestrationStats {
            experiments_started: self.experiments_started.load(Ordering::Relaxed),
            experiments_finished: self.experiments_finished.load(Ordering::Relaxed),
            experiments_failed: self.experiments_failed.load(Ordering::Relaxed),
            active_experiments: active.len(),
            active_by_state,
            last_experiment_complete: self.last_experiment_complete(),
        }
    }

    fn targets_under_experiment(&self) -> HashSet<String> {
        self.lock_experiments()
            .values()
            .map(TrackedExperiment::snapshot)
            .filter(|snapshot| !snapshot.state.is_complete())
            .map(|snapshot| snapshot.target_identity)
            .collect()
    }

    fn build_experiment(
        &self,
        container: &Arc<dyn Container>,
        method: ExperimentMethod,
    ) -> ChaosResult<Experiment> {
        Experiment::builder(container, method)
            .with_timing(self.config.timing.clone())
            .with_admin_gate(self.admin.clone())
            .with_notifications(self.notifications.clone())
            .with_clock(self.clock.clone())
            .build()
    }

    fn register(&self, platform_type: &str, experiments: Vec<Experiment>) -> Vec<Uuid> {
        let mut registry = self.lock_experiments();
        experiments
            .into_iter()
            .map(|experiment| {
                let id = experiment.id();
                log::info!(
                    "Experiment {} ({} on {}) added to the queue",
                    id,
                    experiment.method_name(),
                    experiment.target_identity()
                );
                registry.insert(
                    id,
                    TrackedExperiment {
                        snapshot: experiment.snapshot_handle(),
                        experiment: Arc::new(tokio::sync::Mutex::new(experiment)),
                        platform_type: platform_type.to_string(),
                    },
                );
                self.experiments_started.fetch_add(1, Ordering::Relaxed);
                id
            })
            .collect()
    }

    fn record_suite(&self, suite: ExperimentSuite) {
        log::info!("Experiment can be recreated using suite {}", suite);
        let mut history = self
            .suite_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        history.push_front((self.clock.now(), suite));
        history.truncate(SUITE_HISTORY_LIMIT);
    }

    /// Platform with the earliest next chaos time that is due (or any, when
    /// forced) and has at least one eligible container.
    async fn next_platform_for_experiment(&self, force: bool) -> Option<Arc<ScheduledPlatform>> {
        let now = self.clock.now();
        let mut candidates: Vec<(DateTime<Utc>, Arc<ScheduledPlatform>)> = Vec::new();
        for platform in &self.platforms {
            match platform.next_chaos_time() {
                Ok(next) => candidates.push((next, platform.clone())),
                Err(e) => log::error!(
                    "Could not compute next chaos time for {}: {}",
                    platform.platform_type(),
                    e
                ),
            }
        }
        candidates.sort_by_key(|(next, _)| *next);

        for (next, platform) in candidates {
            if !force && next > now {
                continue;
            }
            match platform.has_eligible_containers().await {
                Ok(true) => return Some(platform),
                Ok(false) => log::debug!(
                    "Platform {} has no eligible containers",
                    platform.platform_type()
                ),
                Err(e) => log::error!(
                    "Could not read roster for {}: {}",
                    platform.platform_type(),
                    e
                ),
            }
        }
        None
    }

    /// Start a new experiment wave if one is due. `force` bypasses the
    /// backoff period, the working calendar, the platform's next chaos time
    /// and the destruction roll.
    pub async fn schedule_experiments(&self, force: bool) -> ChaosResult<Vec<Uuid>> {
        let _wave = self.wave_lock.lock().await;

        if !force && self.in_backoff_period() {
            log::debug!("Cannot start experiments due to backoff period");
            return Ok(Vec::new());
        }
        if self.has_active_experiments() {
            log::debug!("An experiment wave is still running");
            return Ok(Vec::new());
        }
        if self.platforms.is_empty() {
            log::warn!("There are no platforms enabled");
            return Ok(Vec::new());
        }
        if !self.admin.can_run_experiments() {
            log::debug!(
                "Admin state {} does not allow new experiments",
                self.admin.admin_state()
            );
            return Ok(Vec::new());
        }
        if !force {
            if let Some(holidays) = &self.holidays {
                if holidays.is_holiday() || holidays.is_outside_working_hours() {
                    log::debug!("Outside working time, no experiments scheduled");
                    return Ok(Vec::new());
                }
            }
        }

        let platform = match self.next_platform_for_experiment(force).await {
            Some(platform) => platform,
            None => {
                log::debug!("No platforms eligible for experiments");
                return Ok(Vec::new());
            }
        };

        platform.schedule_experiment();
        platform.expire_cached_roster();
        let roster = platform.generate_experiment_roster(force).await?;
        if roster.is_empty() {
            log::debug!(
                "Platform {} has empty roster, no experiments scheduled",
                platform.platform_type()
            );
            return Ok(Vec::new());
        }

        let busy = self.targets_under_experiment();
        let mut experiments = Vec::new();
        for container in roster {
            if busy.contains(&container.identity()) {
                log::debug!("{} already has an experiment running", container.simple_name());
                continue;
            }
            let method = match self.selector.select(&container, None, None) {
                Ok(method) => method,
                Err(e) => {
                    log::warn!("Skipping {} this cycle: {}", container.simple_name(), e);
                    continue;
                }
            };
            match self.build_experiment(&container, method) {
                Ok(experiment) => experiments.push(experiment),
                Err(e) => log::error!(
                    "Could not create experiment for {}: {}",
                    container.simple_name(),
                    e
                ),
            }
        }

        if experiments.is_empty() {
            return Ok(Vec::new());
        }
        self.record_suite(ExperimentSuite::from_experiments(
            platform.platform_type(),
            &experiments,
        ));
        Ok(self.register(platform.platform_type(), experiments))
    }

    /// Create an experiment against every roster container with this identity.
    pub async fn experiment_container(&self, identity: &str) -> ChaosResult<Vec<Uuid>> {
        let busy = self.targets_under_experiment();
        let mut ids = Vec::new();
        for platform in &self.platforms {
            let mut experiments = Vec::new();
            for container in platform.container_by_identity(identity).await? {
                if busy.contains(&container.identity()) {
                    log::warn!("{} already has an experiment running", container.simple_name());
                    continue;
                }
                let method = self.selector.select(&container, None, None)?;
                experiments.push(self.build_experiment(&container, method)?);
            }
            ids.extend(self.register(platform.platform_type(), experiments));
        }
        Ok(ids)
    }

    /// Replay a suite. Nothing is registered unless every criterion can be met.
    pub async fn schedule_experiment_suite(&self, suite: &ExperimentSuite) -> ChaosResult<Vec<Uuid>> {
        suite.validate()?;
        let _wave = self.wave_lock.lock().await;

        if self.has_active_experiments() {
            log::warn!("Cannot start a planned experiment because another experiment is running");
            return Err(ChaosError::another_experiment_in_progress());
        }
        log::info!("Request to start a pre-planned experiment with criteria {}", suite);

        let platform = self
            .platform(&suite.platform_type)
            .ok_or_else(|| ChaosError::platform_does_not_exist(&suite.platform_type))?;
        platform.expire_cached_roster();
        let by_aggregation = platform.roster_by_aggregation_id().await?;

        let mut experiments = Vec::new();
        for criteria in &suite.experiment_criteria {
            let potential = by_aggregation
                .get(&criteria.container_identifier)
                .cloned()
                .unwrap_or_default();
            experiments.extend(self.create_specific_experiments(&platform, criteria, potential).await?);
        }

        self.record_suite(suite.clone());
        Ok(self.register(platform.platform_type(), experiments))
    }

    async fn create_specific_experiments(
        &self,
        platform: &ScheduledPlatform,
        criteria: &ExperimentCriteria,
        mut potential: Vec<Arc<dyn Container>>,
    ) -> ChaosResult<Vec<Experiment>> {
        let required = criteria.experiment_methods.len() + MINIMUM_SURVIVORS;
        if potential.len() < required {
            return Err(ChaosError::not_enough_containers(
                &criteria.container_identifier,
                potential.len(),
                required,
            ));
        }
        log::debug!(
            "Creating experiments {:?} against {} with identifier {}",
            criteria.experiment_methods,
            platform.platform_type(),
            criteria.container_identifier
        );

        let mut experiments = Vec::new();
        for (target, method_name) in criteria
            .specific_container_targets
            .iter()
            .zip(&criteria.experiment_methods)
        {
            let container = match platform.container_by_identity(target).await?.into_iter().next() {
                Some(container) => container,
                None => {
                    log::warn!("Specific target {} is not in the roster", target);
                    continue;
                }
            };
            let method = self.selector.select(&container, None, Some(method_name))?;
            experiments.push(self.build_experiment(&container, method)?);
            potential.retain(|c| !Arc::ptr_eq(c, &container));
        }

        potential.shuffle(&mut *self.rng.lock().unwrap_or_else(PoisonError::into_inner));
        for (container, method_name) in potential.iter().zip(criteria.unassigned_methods()) {
            let method = self.selector.select(container, None, Some(method_name))?;
            experiments.push(self.build_experiment(container, method)?);
        }
        Ok(experiments)
    }

    /// Advance every live experiment once, then drop the terminal ones.
    pub async fn update_experiment_status(&self) {
        let tracked: Vec<(Uuid, Arc<tokio::sync::Mutex<Experiment>>)> = self
            .lock_experiments()
            .iter()
            .map(|(id, tracked)| (*id, tracked.experiment.clone()))
            .collect();
        if tracked.is_empty() {
            log::debug!("No experiments to evaluate right now");
            return;
        }
        log::info!("Experiments total count: {}", tracked.len());

        let mut handles = Vec::with_capacity(tracked.len());
        for (id, experiment) in tracked {
            let permit = match self.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    log::error!("Worker pool closed: {}", e);
                    break;
                }
            };
            let task_experiment = experiment.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                // A tick still in progress owns the experiment; skip it
                let mut experiment = task_experiment.try_lock().ok()?;
                Some(experiment.advance().await)
            });
            handles.push((id, experiment, handle));
        }

        for (id, experiment, handle) in handles {
            match handle.await {
                Ok(Some(_)) => self.log_evaluation(&id),
                Ok(None) => log::debug!("Experiment {} is still being evaluated", id),
                Err(e) => {
                    log::error!("Experiment {} advancement task failed: {}", id, e);
                    experiment
                        .lock()
                        .await
                        .fail_after_panic(format!("advancement task failed: {}", e))
                        .await;
                }
            }
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Experiments count by state: {:?}",
                self.statistics().active_by_state
            );
        }
        self.remove_completed();
    }

    fn log_evaluation(&self, id: &Uuid) {
        let (snapshot, platform_type) = match self.lock_experiments().get(id) {
            Some(tracked) => (tracked.snapshot(), tracked.platform_type.clone()),
            None => return,
        };
        let context: HashMap<String, Value> = [
            ("experiment_id", Value::String(id.to_string())),
            ("experiment_method", Value::String(snapshot.method_name.clone())),
            ("target", Value::String(snapshot.target_name.clone())),
            ("platform", Value::String(platform_type)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let meta = serde_json::to_value(&snapshot).ok();
        self.logger
            .child(context)
            .info_with_meta("Evaluated experiment", meta.as_ref());
    }

    fn remove_completed(&self) {
        let mut registry = self.lock_experiments();
        let before = registry.len();
        registry.retain(|_, tracked| match tracked.snapshot().state {
            ExperimentState::Finished => {
                self.experiments_finished.fetch_add(1, Ordering::Relaxed);
                false
            }
            ExperimentState::Failed => {
                self.experiments_failed.fetch_add(1, Ordering::Relaxed);
                false
            }
            _ => true,
        });

        if before > 0 && registry.is_empty() {
            drop(registry);
            let now = self.clock.now();
            *self
                .last_experiment_complete
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(now);
            log::info!(
                "As of {}, there are no active experiments. The next experiment can run in {} seconds",
                now,
                self.config.experiment_backoff_seconds
            );
        }
    }

    /// Drive scheduling, experiment advancement and notification flushing
    /// until `shutdown` turns true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut scheduler_tick = tokio::time::interval(std::time::Duration::from_secs(
            self.config.scheduler_tick_seconds.max(1),
        ));
        let mut experiment_tick = tokio::time::interval(std::time::Duration::from_secs(
            self.config.experiment_tick_seconds.max(1),
        ));
        let mut flush_tick = tokio::time::interval(std::time::Duration::from_secs(
            self.config.notification_flush_seconds.max(1),
        ));
        log::info!(
            "Chaos engine running with {} platforms and {} workers",
            self.platforms.len(),
            self.config.worker_pool_size
        );

        loop {
            tokio::select! {
                _ = scheduler_tick.tick() => {
                    if self.config.automated_mode {
                        if let Err(e) = self.schedule_experiments(false).await {
                            log::error!("Experiment scheduling failed: {}", e);
                        }
                    }
                }
                _ = experiment_tick.tick() => self.update_experiment_status().await,
                _ = flush_tick.tick() => self.notifications.flush_buffers().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Chaos engine shutting down");
                        break;
                    }
                }
            }
        }
        self.notifications.flush_buffers().await;
    }
}
