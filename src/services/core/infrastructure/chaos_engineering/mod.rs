// src/services/core/infrastructure/chaos_engineering/mod.rs

//! Chaos Engineering Engine
//!
//! Schedules failure-injection experiments against registered platforms and
//! drives each experiment through its lifecycle until it finishes or fails.
//!
//! ## Core Pieces:
//! - **Scheduling**: [`ChaosScheduler`] places the next experiment a random,
//!   working-time-aware interval after the previous one
//! - **Selection**: [`ExperimentMethodSelector`] picks a disruptive method
//!   declared by the target container
//! - **Lifecycle**: [`Experiment`] is the per-target state machine with
//!   bounded, rate-limited self-healing
//! - **Driving**: [`ExperimentOrchestrator`] ticks the scheduler and every
//!   live experiment on a bounded worker pool

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::services::core::calendar::CalendarConfig;
use crate::utils::error::{ChaosError, ChaosResult};

pub mod chaos_scheduler;
pub mod container;
pub mod experiment_engine;
pub mod experiment_method;
pub mod experiment_orchestrator;
pub mod experiment_state;
pub mod experiment_suite;
pub mod method_selector;
pub mod platform;

pub use chaos_scheduler::{BoxMullerGaussian, ChaosScheduler, ChaosSchedulerBuilder, GaussianSource};
pub use container::{Container, ContainerManager};
pub use experiment_engine::{Experiment, ExperimentBuilder, ExperimentSnapshot, SelfHealingBlock};
pub use experiment_method::{
    bind_methods, ExperimentHandle, ExperimentMethod, ExperimentMethodDescriptor, MethodSpec,
};
pub use experiment_orchestrator::{ExperimentOrchestrator, OrchestrationStats};
pub use experiment_state::ExperimentState;
pub use experiment_suite::{ExperimentCriteria, ExperimentSuite};
pub use method_selector::ExperimentMethodSelector;
pub use platform::{Platform, ScheduledPlatform};

/// Duration and retry settings applied to every experiment unless a method overrides them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentTimingConfig {
    /// Health is not trusted before this many seconds
    pub minimum_duration_seconds: u64,
    /// Self-healing starts after this many seconds of bad health
    pub maximum_duration_seconds: u64,
    /// Health must stay normal this long before an experiment finishes
    pub finalization_duration_seconds: u64,
    /// Cap on total time spent finalizing
    pub finalization_timeout_seconds: u64,
    /// Minimum gap between self-healing attempts
    pub self_healing_interval_seconds: u64,
    pub maximum_self_healing_retries: u32,
}

impl Default for ExperimentTimingConfig {
    fn default() -> Self {
        Self {
            minimum_duration_seconds: 30,
            maximum_duration_seconds: 300,
            finalization_duration_seconds: 30,
            finalization_timeout_seconds: 300,
            self_healing_interval_seconds: 300,
            maximum_self_healing_retries: 10,
        }
    }
}

impl ExperimentTimingConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if self.minimum_duration_seconds > self.maximum_duration_seconds {
            return Err(ChaosError::config_error(
                "minimum_duration_seconds must not exceed maximum_duration_seconds",
            ));
        }
        if self.maximum_self_healing_retries == 0 {
            return Err(ChaosError::config_error(
                "maximum_self_healing_retries must be greater than 0",
            ));
        }
        if self.finalization_timeout_seconds < self.finalization_duration_seconds {
            return Err(ChaosError::config_error(
                "finalization_timeout_seconds must be at least finalization_duration_seconds",
            ));
        }
        Ok(())
    }
}

/// Chaos Engineering Engine Configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChaosEngineeringConfig {
    /// Schedule experiments automatically; manual triggers still work when off
    pub automated_mode: bool,
    /// Average working time between two experiments on one platform
    pub average_millis_between_experiments: u64,
    /// Number of experiment ticks that may run at once
    pub worker_pool_size: usize,
    pub scheduler_tick_seconds: u64,
    pub experiment_tick_seconds: u64,
    pub notification_flush_seconds: u64,
    /// Quiet period after the last experiment completes
    pub experiment_backoff_seconds: u64,
    pub roster_cache_seconds: u64,
    /// Chance (0.0 to 1.0) that a container is picked for an experiment
    pub destruction_probability: f64,
    /// Method name to prefer whenever a target offers it
    pub preferred_experiment: Option<String>,
    pub timing: ExperimentTimingConfig,
    pub calendar: CalendarConfig,
}

impl Default for ChaosEngineeringConfig {
    fn default() -> Self {
        Self {
            automated_mode: true,
            average_millis_between_experiments: 14_400_000, // 4 hours
            worker_pool_size: 10,
            scheduler_tick_seconds: 15,
            experiment_tick_seconds: 15,
            notification_flush_seconds: 5,
            experiment_backoff_seconds: 900,
            roster_cache_seconds: 3600,
            destruction_probability: 0.2,
            preferred_experiment: None,
            timing: ExperimentTimingConfig::default(),
            calendar: CalendarConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> ChaosResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ChaosError::config_error(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

impl ChaosEngineeringConfig {
    /// Create a development-friendly configuration
    pub fn development() -> Self {
        Self {
            average_millis_between_experiments: 600_000, // 10 minutes
            scheduler_tick_seconds: 5,
            experiment_tick_seconds: 5,
            experiment_backoff_seconds: 60,
            roster_cache_seconds: 300,
            destruction_probability: 0.5,
            timing: ExperimentTimingConfig {
                minimum_duration_seconds: 10,
                maximum_duration_seconds: 60,
                finalization_duration_seconds: 10,
                finalization_timeout_seconds: 120,
                self_healing_interval_seconds: 30,
                maximum_self_healing_retries: 3,
            },
            calendar: CalendarConfig {
                always_open: true,
                ..CalendarConfig::default()
            },
            ..Self::default()
        }
    }

    /// Create a production configuration
    pub fn production() -> Self {
        Self {
            automated_mode: false, // Must be explicitly enabled in production
            destruction_probability: 0.1,
            ..Self::default()
        }
    }

    /// Defaults overridden by `CHAOS_*` environment variables
    pub fn from_env() -> ChaosResult<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("CHAOS_AUTOMATED_MODE")? {
            config.automated_mode = v;
        }
        if let Some(v) = env_parse("CHAOS_AVERAGE_MILLIS_BETWEEN_EXPERIMENTS")? {
            config.average_millis_between_experiments = v;
        }
        if let Some(v) = env_parse("CHAOS_WORKER_POOL_SIZE")? {
            config.worker_pool_size = v;
        }
        if let Some(v) = env_parse("CHAOS_SCHEDULER_TICK_SECONDS")? {
            config.scheduler_tick_seconds = v;
        }
        if let Some(v) = env_parse("CHAOS_EXPERIMENT_TICK_SECONDS")? {
            config.experiment_tick_seconds = v;
        }
        if let Some(v) = env_parse("CHAOS_EXPERIMENT_BACKOFF_SECONDS")? {
            config.experiment_backoff_seconds = v;
        }
        if let Some(v) = env_parse("CHAOS_DESTRUCTION_PROBABILITY")? {
            config.destruction_probability = v;
        }
        if let Ok(v) = std::env::var("CHAOS_PREFERRED_EXPERIMENT") {
            config.preferred_experiment = Some(v).filter(|name| !name.trim().is_empty());
        }
        if let Some(v) = env_parse("CHAOS_MINIMUM_DURATION_SECONDS")? {
            config.timing.minimum_duration_seconds = v;
        }
        if let Some(v) = env_parse("CHAOS_MAXIMUM_DURATION_SECONDS")? {
            config.timing.maximum_duration_seconds = v;
        }
        if let Some(v) = env_parse("CHAOS_FINALIZATION_DURATION_SECONDS")? {
            config.timing.finalization_duration_seconds = v;
        }
        if let Some(v) = env_parse("CHAOS_SELF_HEALING_INTERVAL_SECONDS")? {
            config.timing.self_healing_interval_seconds = v;
        }
        if let Some(v) = env_parse("CHAOS_MAXIMUM_SELF_HEALING_RETRIES")? {
            config.timing.maximum_self_healing_retries = v;
        }
        if let Some(v) = env_parse("CHAOS_WORKDAY_START_HOUR")? {
            config.calendar.start_hour = v;
        }
        if let Some(v) = env_parse("CHAOS_WORKDAY_END_HOUR")? {
            config.calendar.end_hour = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> ChaosResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ChaosResult<()> {
        if self.average_millis_between_experiments == 0 {
            return Err(ChaosError::config_error(
                "average_millis_between_experiments must be greater than 0",
            ));
        }
        if self.worker_pool_size == 0 {
            return Err(ChaosError::config_error(
                "worker_pool_size must be greater than 0",
            ));
        }
        if self.scheduler_tick_seconds == 0
            || self.experiment_tick_seconds == 0
            || self.notification_flush_seconds == 0
        {
            return Err(ChaosError::config_error("tick intervals must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.destruction_probability) {
            return Err(ChaosError::config_error(
                "destruction_probability must be between 0.0 and 1.0",
            ));
        }
        self.timing.validate()?;
        self.calendar.validate()?;
        Ok(())
    }
}
