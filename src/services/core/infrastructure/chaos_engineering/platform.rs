// src/services/core/infrastructure/chaos_engineering/platform.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::chaos_scheduler::ChaosScheduler;
use super::container::{Container, ContainerManager};
use super::ChaosEngineeringConfig;
use crate::utils::error::ChaosResult;
use crate::utils::time::Clock;

/// A source of containers, e.g. one cloud account or cluster.
#[async_trait]
pub trait Platform: Send + Sync {
    fn platform_type(&self) -> &str;

    /// Enumerate the containers currently present
    async fn generate_roster(&self) -> ChaosResult<Vec<Arc<dyn Container>>>;

    /// Per-platform override of the configured destruction probability
    fn destruction_probability(&self) -> Option<f64> {
        None
    }

    /// Per-platform override of the configured average interval
    fn average_millis_between_experiments(&self) -> Option<u64> {
        None
    }
}

struct CachedRoster {
    containers: Vec<Arc<dyn Container>>,
    fetched_at: DateTime<Utc>,
}

/// A platform plus its scheduler, roster cache and container registry.
pub struct ScheduledPlatform {
    platform: Arc<dyn Platform>,
    scheduler: Mutex<ChaosScheduler>,
    containers: ContainerManager,
    roster_cache: Mutex<Option<CachedRoster>>,
    roster_ttl: Duration,
    destruction_probability: f64,
    experiment_times: Mutex<Vec<DateTime<Utc>>>,
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
}

impl ScheduledPlatform {
    pub fn new(
        platform: Arc<dyn Platform>,
        scheduler: ChaosScheduler,
        config: &ChaosEngineeringConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let destruction_probability = platform
            .destruction_probability()
            .unwrap_or(config.destruction_probability)
            .clamp(0.0, 1.0);
        Self {
            platform,
            scheduler: Mutex::new(scheduler),
            containers: ContainerManager::new(),
            roster_cache: Mutex::new(None),
            roster_ttl: Duration::seconds(config.roster_cache_seconds as i64),
            destruction_probability,
            experiment_times: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            clock,
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn platform_type(&self) -> &str {
        self.platform.platform_type()
    }

    pub fn destruction_probability(&self) -> f64 {
        self.destruction_probability
    }

    pub fn container_manager(&self) -> &ContainerManager {
        &self.containers
    }

    pub fn next_chaos_time(&self) -> ChaosResult<DateTime<Utc>> {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_next_chaos_time()
    }

    pub fn can_experiment(&self, now: DateTime<Utc>) -> ChaosResult<bool> {
        Ok(now >= self.next_chaos_time()?)
    }

    /// Consume the scheduled time and record the experiment.
    pub fn schedule_experiment(&self) {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .start_experiment();
        self.experiment_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.clock.now());
    }

    pub fn experiment_times(&self) -> Vec<DateTime<Utc>> {
        self.experiment_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn expire_cached_roster(&self) {
        *self.roster_cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached_roster(&self) -> Option<Vec<Arc<dyn Container>>> {
        let cache = self.roster_cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.as_ref().and_then(|cached| {
            if self.clock.now() - cached.fetched_at < self.roster_ttl {
                Some(cached.containers.clone())
            } else {
                None
            }
        })
    }

    /// Current containers, deduplicated against the registry.
    pub async fn roster(&self) -> ChaosResult<Vec<Arc<dyn Container>>> {
        if let Some(containers) = self.cached_roster() {
            return Ok(containers);
        }

        let generated = self.platform.generate_roster().await?;
        let live: HashSet<String> = generated.iter().map(|c| c.identity()).collect();
        let mut seen = HashSet::new();
        let containers: Vec<Arc<dyn Container>> = generated
            .into_iter()
            .map(|c| self.containers.offer(c))
            .filter(|c| seen.insert(c.identity()))
            .collect();
        self.containers.evict_missing(&live);

        log::debug!(
            "Platform {} roster refreshed with {} containers",
            self.platform_type(),
            containers.len()
        );
        *self.roster_cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedRoster {
            containers: containers.clone(),
            fetched_at: self.clock.now(),
        });
        Ok(containers)
    }

    pub async fn has_eligible_containers(&self) -> ChaosResult<bool> {
        Ok(self
            .roster()
            .await?
            .iter()
            .any(|c| c.eligible_for_experiments()))
    }

    pub async fn container_by_identity(&self, identity: &str) -> ChaosResult<Vec<Arc<dyn Container>>> {
        Ok(self
            .roster()
            .await?
            .into_iter()
            .filter(|c| c.identity() == identity)
            .collect())
    }

    pub async fn roster_by_aggregation_id(
        &self,
    ) -> ChaosResult<HashMap<String, Vec<Arc<dyn Container>>>> {
        let mut grouped: HashMap<String, Vec<Arc<dyn Container>>> = HashMap::new();
        for container in self.roster().await? {
            grouped
                .entry(container.aggregation_identifier())
                .or_default()
                .push(container);
        }
        Ok(grouped)
    }

    fn roll_destruction(&self) -> bool {
        let roll: f64 = self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen();
        roll < self.destruction_probability
    }

    /// Eligible containers that won the destruction roll. `force` skips the roll.
    pub async fn generate_experiment_roster(&self, force: bool) -> ChaosResult<Vec<Arc<dyn Container>>> {
        Ok(self
            .roster()
            .await?
            .into_iter()
            .filter(|c| c.eligible_for_experiments())
            .filter(|_| force || self.roll_destruction())
            .collect())
    }
}
