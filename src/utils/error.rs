// src/utils/error.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::types::ExperimentType;

pub type ChaosResult<T> = Result<T, ChaosError>;

/// Custom error details for additional context
pub type ErrorDetails = HashMap<String, serde_json::Value>;

/// Numeric error codes shared with operators and dashboards.
pub mod codes {
    pub const GENERIC_FAILURE: u32 = 10000;
    pub const EXPERIMENT_START_FAILURE: u32 = 12001;
    pub const PLATFORM_DOES_NOT_EXIST: u32 = 12004;
    pub const SELF_HEALING_CALL_ERROR: u32 = 13001;
    pub const NOT_ENOUGH_CONTAINERS_FOR_PLANNED_EXPERIMENT: u32 = 13004;
    pub const EXPERIMENT_DOES_NOT_EXIST_FOR_CONTAINER: u32 = 13005;
    pub const ANOTHER_EXPERIMENT_IN_PROGRESS: u32 = 13006;
    pub const NO_ELIGIBLE_METHOD: u32 = 13007;
    pub const TARGET_DOES_NOT_EXIST: u32 = 13008;
    pub const FINALIZATION_FAILURE: u32 = 13009;
    pub const NOTIFICATION_SEND_ERROR: u32 = 18001;
    pub const NOTIFICATION_BUFFER_RETRY_EXCEEDED: u32 = 18202;
    pub const INVALID_STATE: u32 = 19001;
    pub const CONFIGURATION_ERROR: u32 = 19100;
}

/// Main error type for the chaos engine
/// Optimized for size by boxing large fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosError {
    pub message: String,
    pub details: Option<Box<ErrorDetails>>,
    pub error_code: Option<u32>,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[default]
    UnknownError,
    ConfigurationError,
    ValidationError,
    NotFoundError,
    InvalidState,
    ExperimentStartError,
    SelfHealingError,
    HealthCheckError,
    NotificationError,
    PlatformError,
    TimeoutError,
    SerializationError,
    Internal,
}

impl fmt::Display for ChaosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ChaosError {}

impl ChaosError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            error_code: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(Box::new(details));
        self
    }

    pub fn with_code(mut self, error_code: u32) -> Self {
        self.error_code = Some(error_code);
        self
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError, message).with_code(codes::CONFIGURATION_ERROR)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::NotFoundError, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message).with_code(codes::INVALID_STATE)
    }

    pub fn experiment_start_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExperimentStartError, message)
            .with_code(codes::EXPERIMENT_START_FAILURE)
    }

    pub fn self_healing_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SelfHealingError, message).with_code(codes::SELF_HEALING_CALL_ERROR)
    }

    pub fn health_check_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HealthCheckError, message)
    }

    pub fn notification_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotificationError, message).with_code(codes::NOTIFICATION_SEND_ERROR)
    }

    pub fn platform_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PlatformError, message)
    }

    pub fn platform_does_not_exist(platform_type: &str) -> Self {
        Self::new(
            ErrorKind::NotFoundError,
            format!("Platform does not exist: {}", platform_type),
        )
        .with_code(codes::PLATFORM_DOES_NOT_EXIST)
    }

    pub fn another_experiment_in_progress() -> Self {
        Self::invalid_state("Cannot start a planned experiment because another experiment is running")
            .with_code(codes::ANOTHER_EXPERIMENT_IN_PROGRESS)
    }

    pub fn not_enough_containers(aggregation_id: &str, available: usize, required: usize) -> Self {
        let mut details = ErrorDetails::new();
        details.insert(
            "aggregation_id".to_string(),
            serde_json::Value::String(aggregation_id.to_string()),
        );
        details.insert("available".to_string(), serde_json::json!(available));
        details.insert("required".to_string(), serde_json::json!(required));

        Self::new(
            ErrorKind::ValidationError,
            "Not enough containers for the planned experiment",
        )
        .with_details(details)
        .with_code(codes::NOT_ENOUGH_CONTAINERS_FOR_PLANNED_EXPERIMENT)
    }

    pub fn timeout_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }

    pub fn internal_error<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::Internal, message).with_code(codes::GENERIC_FAILURE)
    }
}

impl From<serde_json::Error> for ChaosError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(
            ErrorKind::SerializationError,
            format!("JSON parsing error: {}", err),
        )
    }
}

impl From<anyhow::Error> for ChaosError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ChaosError>() {
            Ok(chaos_error) => chaos_error,
            Err(other) => Self::internal_error(format!("{:#}", other)),
        }
    }
}

impl From<SelectionError> for ChaosError {
    fn from(err: SelectionError) -> Self {
        Self::new(ErrorKind::NotFoundError, err.to_string()).with_code(err.code())
    }
}

/// Failure to pick an experiment method for a target.
///
/// The driver treats these as "skip this target for this cycle".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No eligible experiment method on {container} for {experiment_type:?}")]
    NoEligibleMethod {
        container: String,
        experiment_type: Option<ExperimentType>,
    },
    #[error("Experiment method {method} does not exist for {container}")]
    ExperimentDoesNotExist { container: String, method: String },
}

impl SelectionError {
    pub fn code(&self) -> u32 {
        match self {
            SelectionError::NoEligibleMethod { .. } => codes::NO_ELIGIBLE_METHOD,
            SelectionError::ExperimentDoesNotExist { .. } => {
                codes::EXPERIMENT_DOES_NOT_EXIST_FOR_CONTAINER
            }
        }
    }
}

/// Terminal failure classification captured on an experiment.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "failure", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentFailure {
    #[error("Cannot start an experiment in admin state {0}")]
    AdminBlocked(String),
    #[error("Container is already in an abnormal state")]
    TargetUnhealthy,
    #[error("Experiment method not available for {0:?}")]
    MethodNotAvailable(ExperimentType),
    #[error("Failed to start experiment: {0}")]
    StartFailure(String),
    #[error("An exception occurred while running self-healing: {0}")]
    SelfHealingError(String),
    #[error("Maximum self healing retries reached ({0})")]
    MaximumSelfHealingRetriesReached(u32),
    #[error("Container cannot be found")]
    TargetMissing,
    #[error("Error running finalization: {0}")]
    FinalizationError(String),
    #[error("Container did not stay healthy through finalization within {0}s")]
    FinalizationTimeout(u64),
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

impl ExperimentFailure {
    pub fn code(&self) -> u32 {
        match self {
            ExperimentFailure::AdminBlocked(_)
            | ExperimentFailure::TargetUnhealthy
            | ExperimentFailure::StartFailure(_) => codes::EXPERIMENT_START_FAILURE,
            ExperimentFailure::MethodNotAvailable(_) => {
                codes::EXPERIMENT_DOES_NOT_EXIST_FOR_CONTAINER
            }
            ExperimentFailure::SelfHealingError(_) => codes::SELF_HEALING_CALL_ERROR,
            ExperimentFailure::MaximumSelfHealingRetriesReached(_) => codes::SELF_HEALING_CALL_ERROR,
            ExperimentFailure::TargetMissing => codes::TARGET_DOES_NOT_EXIST,
            ExperimentFailure::FinalizationError(_) | ExperimentFailure::FinalizationTimeout(_) => {
                codes::FINALIZATION_FAILURE
            }
            ExperimentFailure::InvalidTransition(_) => codes::INVALID_STATE,
        }
    }
}

// Helper macro for creating errors with context
#[macro_export]
macro_rules! chaos_error {
    ($kind:expr, $msg:expr) => {
        $crate::utils::error::ChaosError::new($kind, $msg)
    };
    ($kind:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let mut details = std::collections::HashMap::new();
        $(
            details.insert($key.to_string(), serde_json::json!($value));
        )+
        $crate::utils::error::ChaosError::new($kind, $msg).with_details(details)
    }};
}
