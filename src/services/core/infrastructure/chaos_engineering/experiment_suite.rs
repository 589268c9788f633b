// src/services/core/infrastructure/chaos_engineering/experiment_suite.rs

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::experiment_engine::Experiment;
use crate::utils::error::{ChaosError, ChaosResult};

/// Methods to run against containers sharing one aggregation identifier.
///
/// The first `specific_container_targets.len()` methods go to the named
/// containers; the rest go to randomly chosen members of the aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentCriteria {
    pub container_identifier: String,
    pub experiment_methods: Vec<String>,
    #[serde(default)]
    pub specific_container_targets: Vec<String>,
}

impl ExperimentCriteria {
    pub fn new(container_identifier: impl Into<String>, experiment_methods: Vec<String>) -> Self {
        Self {
            container_identifier: container_identifier.into(),
            experiment_methods,
            specific_container_targets: Vec::new(),
        }
    }

    pub fn with_specific_targets(mut self, targets: Vec<String>) -> ChaosResult<Self> {
        self.specific_container_targets = targets;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ChaosResult<()> {
        if self.specific_container_targets.len() > self.experiment_methods.len() {
            return Err(ChaosError::validation_error(
                "Experiment methods should be at least the same size as specific container targets",
            ));
        }
        Ok(())
    }

    /// Methods left over once every specific target has taken one
    pub fn unassigned_methods(&self) -> &[String] {
        &self.experiment_methods[self.specific_container_targets.len().min(self.experiment_methods.len())..]
    }
}

/// A replayable description of one experiment wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSuite {
    pub platform_type: String,
    pub experiment_criteria: Vec<ExperimentCriteria>,
}

impl ExperimentSuite {
    pub fn new(platform_type: impl Into<String>, experiment_criteria: Vec<ExperimentCriteria>) -> Self {
        Self {
            platform_type: platform_type.into(),
            experiment_criteria,
        }
    }

    /// Group a wave's experiments by aggregation identifier.
    pub fn from_experiments<'a>(
        platform_type: &str,
        experiments: impl IntoIterator<Item = &'a Experiment>,
    ) -> Self {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for experiment in experiments {
            grouped
                .entry(experiment.aggregation_identifier().to_string())
                .or_default()
                .push(experiment.method_name().to_string());
        }
        Self::new(
            platform_type,
            grouped
                .into_iter()
                .map(|(aggregation, methods)| ExperimentCriteria::new(aggregation, methods))
                .collect(),
        )
    }

    pub fn validate(&self) -> ChaosResult<()> {
        self.experiment_criteria
            .iter()
            .try_for_each(ExperimentCriteria::validate)
    }

    pub fn from_json(json: &str) -> ChaosResult<Self> {
        let suite: Self = serde_json::from_str(json)?;
        suite.validate()?;
        Ok(suite)
    }

    pub fn experiment_count(&self) -> usize {
        self.experiment_criteria
            .iter()
            .map(|c| c.experiment_methods.len())
            .sum()
    }
}

impl fmt::Display for ExperimentSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "ExperimentSuite({})", self.platform_type),
        }
    }
}
