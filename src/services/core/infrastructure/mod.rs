// src/services/core/infrastructure/mod.rs

//! Infrastructure Services Module
//!
//! ## Modules:
//! 1. **Chaos Engineering** - scheduling, experiment lifecycle and the driver
//! 2. **Notification Module** - lifecycle events fanned out to pluggable sinks

pub mod chaos_engineering;
pub mod notification_module;

pub use chaos_engineering::{ChaosEngineeringConfig, ExperimentOrchestrator};
pub use notification_module::{NotificationManager, NotificationSink};
