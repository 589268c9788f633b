// src/services/core/infrastructure/chaos_engineering/container.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::experiment_method::ExperimentMethod;
use crate::types::{ContainerHealth, ExperimentType};
use crate::utils::error::ChaosResult;

/// A target resource experiments can run against.
///
/// Implementations are supplied by platform adapters. Experiments only keep a
/// weak reference; the platform's [`ContainerManager`] owns the instance.
#[async_trait]
pub trait Container: Send + Sync {
    /// Unique across the platform; used to deduplicate roster entries
    fn identity(&self) -> String;

    fn simple_name(&self) -> String;

    fn container_type(&self) -> &str;

    fn is_ephemeral(&self) -> bool {
        false
    }

    /// Groups interchangeable containers, e.g. instances of one service
    fn aggregation_identifier(&self) -> String {
        self.simple_name()
    }

    fn eligible_for_experiments(&self) -> bool {
        true
    }

    fn experiment_methods(self: Arc<Self>) -> Vec<ExperimentMethod>;

    fn supports_experiment_type(self: Arc<Self>, experiment_type: ExperimentType) -> bool {
        self.experiment_methods()
            .iter()
            .any(|method| method.experiment_type() == experiment_type)
    }

    async fn container_health(&self, experiment_type: ExperimentType)
        -> ChaosResult<ContainerHealth>;
}

/// Keeps at most one live instance per container identity.
#[derive(Default)]
pub struct ContainerManager {
    containers: Mutex<HashMap<String, Arc<dyn Container>>>,
}

impl ContainerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_matching_container(&self, identity: &str) -> Option<Arc<dyn Container>> {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Register `container`, or hand back the instance already known for its identity.
    pub fn offer(&self, container: Arc<dyn Container>) -> Arc<dyn Container> {
        let identity = container.identity();
        let mut containers = self.containers.lock().unwrap_or_else(PoisonError::into_inner);
        match containers.get(&identity) {
            Some(existing) => {
                log::debug!("Using existing container object for {}", identity);
                existing.clone()
            }
            None => {
                log::debug!("Registering new container object for {}", identity);
                containers.insert(identity, container.clone());
                container
            }
        }
    }

    /// Drop every container whose identity is not in `live`. Returns how many went.
    pub fn evict_missing(&self, live: &HashSet<String>) -> usize {
        let mut containers = self.containers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = containers.len();
        containers.retain(|identity, _| live.contains(identity));
        let evicted = before - containers.len();
        if evicted > 0 {
            log::debug!("Evicted {} containers no longer in the roster", evicted);
        }
        evicted
    }

    pub fn remove(&self, identity: &str) -> Option<Arc<dyn Container>> {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    pub fn len(&self) -> usize {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
