// src/utils/mod.rs

pub mod error;
pub mod logger;
pub mod time;

// Re-export commonly used items
pub use error::{ChaosError, ChaosResult, ErrorKind, ExperimentFailure, SelectionError};
pub use logger::*;
pub use time::{Clock, ManualClock, SystemClock};
