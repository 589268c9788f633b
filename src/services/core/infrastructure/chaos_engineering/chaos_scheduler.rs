// src/services/core/infrastructure/chaos_engineering/chaos_scheduler.rs

//! Decides when the next experiment may start
//!
//! Intervals are drawn from a skewed distribution around the configured
//! average and measured in working time, so experiments land inside business
//! hours at unpredictable moments.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::services::core::calendar::WorkingTimeOracle;
use crate::utils::error::{ChaosError, ChaosResult};
use crate::utils::time::{Clock, SystemClock};

/// Ramanujan-Soldner constant
pub const RAMANUJAN_SOLDNER_CONSTANT: f64 = 1.451_369_234_883_381;

const LOWER_BOUND: f64 = 0.01;
const UPPER_BOUND: f64 = 0.99999;

/// Source of standard normal samples
pub trait GaussianSource: Send {
    fn next_gaussian(&mut self) -> f64;
}

/// Box-Muller transform over a seeded RNG, caching the paired sample.
pub struct BoxMullerGaussian {
    rng: StdRng,
    spare: Option<f64>,
}

impl BoxMullerGaussian {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self { rng, spare: None }
    }
}

impl Default for BoxMullerGaussian {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussianSource for BoxMullerGaussian {
    fn next_gaussian(&mut self) -> f64 {
        if let Some(spare) = self.spare.take() {
            return spare;
        }
        // gen() is in [0, 1); keep u1 away from 0 for ln()
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen::<f64>();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        self.spare = Some(radius * theta.sin());
        radius * theta.cos()
    }
}

/// Per-platform experiment timer.
///
/// `next_chaos_time` is cached once computed and only cleared by
/// [`ChaosScheduler::start_experiment`].
pub struct ChaosScheduler {
    average_millis_between_experiments: u64,
    next_chaos_time: Option<DateTime<Utc>>,
    last_chaos_time: Option<DateTime<Utc>>,
    oracle: Arc<dyn WorkingTimeOracle>,
    clock: Arc<dyn Clock>,
    gaussian: Box<dyn GaussianSource>,
}

impl ChaosScheduler {
    pub fn builder() -> ChaosSchedulerBuilder {
        ChaosSchedulerBuilder::default()
    }

    pub fn get_next_chaos_time(&mut self) -> ChaosResult<DateTime<Utc>> {
        if let Some(next) = self.next_chaos_time {
            return Ok(next);
        }

        let next = match self.last_chaos_time {
            Some(last) => {
                let factor = self.scaling_factor();
                let offset = self.scaled_interval(factor);
                self.oracle.instant_after_working_millis(last, offset)?
            }
            None => {
                // First interval after startup is biased shorter
                let factor = self.scaling_factor().sqrt();
                let offset = self.scaled_interval(factor);
                self.oracle
                    .instant_after_working_millis(self.clock.now(), offset)?
            }
        };

        log::debug!("Next chaos time calculated as {}", next);
        self.next_chaos_time = Some(next);
        Ok(next)
    }

    /// Record that an experiment started at the scheduled time.
    pub fn start_experiment(&mut self) {
        self.last_chaos_time = self.next_chaos_time.take();
    }

    pub fn last_chaos_time(&self) -> Option<DateTime<Utc>> {
        self.last_chaos_time
    }

    pub fn peek_next_chaos_time(&self) -> Option<DateTime<Utc>> {
        self.next_chaos_time
    }

    pub fn average_millis_between_experiments(&self) -> u64 {
        self.average_millis_between_experiments
    }

    fn scaled_interval(&self, factor: f64) -> Duration {
        Duration::milliseconds((factor * self.average_millis_between_experiments as f64) as i64)
    }

    /// Positive multiplier with an exponential-like tail, mostly near 1.
    pub fn scaling_factor(&mut self) -> f64 {
        let mut g;
        loop {
            g = (self.gaussian.next_gaussian() + 1.0) * 0.5 / RAMANUJAN_SOLDNER_CONSTANT;
            if g > LOWER_BOUND && g < UPPER_BOUND {
                break;
            }
        }
        (1.0 - g).ln() / 0.5f64.ln()
    }
}

#[derive(Default)]
pub struct ChaosSchedulerBuilder {
    average_millis_between_experiments: Option<u64>,
    last_chaos_time: Option<DateTime<Utc>>,
    oracle: Option<Arc<dyn WorkingTimeOracle>>,
    clock: Option<Arc<dyn Clock>>,
    gaussian: Option<Box<dyn GaussianSource>>,
}

impl ChaosSchedulerBuilder {
    pub fn with_average_millis_between_experiments(mut self, millis: u64) -> Self {
        self.average_millis_between_experiments = Some(millis);
        self
    }

    pub fn with_last_chaos_time(mut self, last_chaos_time: DateTime<Utc>) -> Self {
        self.last_chaos_time = Some(last_chaos_time);
        self
    }

    pub fn with_working_time_oracle(mut self, oracle: Arc<dyn WorkingTimeOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_gaussian_source(mut self, gaussian: Box<dyn GaussianSource>) -> Self {
        self.gaussian = Some(gaussian);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_gaussian_source(Box::new(BoxMullerGaussian::with_seed(seed)))
    }

    pub fn build(self) -> ChaosResult<ChaosScheduler> {
        let average = self.average_millis_between_experiments.ok_or_else(|| {
            ChaosError::config_error("Scheduler needs average_millis_between_experiments")
        })?;
        if average == 0 {
            return Err(ChaosError::config_error(
                "average_millis_between_experiments must be greater than 0",
            ));
        }
        let oracle = self
            .oracle
            .ok_or_else(|| ChaosError::config_error("Scheduler needs a working time oracle"))?;

        Ok(ChaosScheduler {
            average_millis_between_experiments: average,
            next_chaos_time: None,
            last_chaos_time: self.last_chaos_time,
            oracle,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            gaussian: self
                .gaussian
                .unwrap_or_else(|| Box::new(BoxMullerGaussian::new())),
        })
    }
}
