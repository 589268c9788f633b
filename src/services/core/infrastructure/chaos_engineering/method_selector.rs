// src/services/core/infrastructure/chaos_engineering/method_selector.rs

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::container::Container;
use super::experiment_method::ExperimentMethod;
use crate::types::ExperimentType;
use crate::utils::error::SelectionError;

/// Picks the experiment method to run against a container.
pub struct ExperimentMethodSelector {
    preferred: Option<String>,
    rng: Mutex<StdRng>,
}

impl ExperimentMethodSelector {
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            preferred,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(preferred: Option<String>, seed: u64) -> Self {
        Self {
            preferred,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn preferred(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    /// Methods the container may run, dropping ephemeral-only methods on
    /// containers that cannot be replaced.
    pub fn runnable_methods(&self, container: &Arc<dyn Container>) -> Vec<ExperimentMethod> {
        let ephemeral = container.is_ephemeral();
        container
            .clone()
            .experiment_methods()
            .into_iter()
            .filter(|method| ephemeral || !method.descriptor().ephemeral_only)
            .collect()
    }

    /// Runnable methods of `experiment_type`, or of every type when `None`.
    pub fn eligible_methods(
        &self,
        container: &Arc<dyn Container>,
        experiment_type: Option<ExperimentType>,
    ) -> Vec<ExperimentMethod> {
        self.runnable_methods(container)
            .into_iter()
            .filter(|method| experiment_type.map_or(true, |t| method.experiment_type() == t))
            .collect()
    }

    /// Choose a method. A named `specific` method wins; otherwise the
    /// configured preferred method if eligible; otherwise a uniform pick.
    pub fn select(
        &self,
        container: &Arc<dyn Container>,
        experiment_type: Option<ExperimentType>,
        specific: Option<&str>,
    ) -> Result<ExperimentMethod, SelectionError> {
        if let Some(name) = specific {
            return self
                .runnable_methods(container)
                .into_iter()
                .find(|method| method.name() == name)
                .ok_or_else(|| SelectionError::ExperimentDoesNotExist {
                    container: container.simple_name(),
                    method: name.to_string(),
                });
        }

        let candidates = self.eligible_methods(container, experiment_type);
        if candidates.is_empty() {
            return Err(SelectionError::NoEligibleMethod {
                container: container.simple_name(),
                experiment_type,
            });
        }

        if let Some(preferred) = &self.preferred {
            if let Some(method) = candidates.iter().find(|m| m.name() == preferred) {
                log::debug!("Using preferred experiment method {}", preferred);
                return Ok(method.clone());
            }
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        candidates
            .choose(&mut *rng)
            .cloned()
            .ok_or_else(|| SelectionError::NoEligibleMethod {
                container: container.simple_name(),
                experiment_type,
            })
    }
}

impl Default for ExperimentMethodSelector {
    fn default() -> Self {
        Self::new(None)
    }
}
