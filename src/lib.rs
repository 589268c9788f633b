//! Chaos engine
//!
//! Schedules failure-injection experiments against pluggable platforms inside
//! working hours, then drives each experiment through a bounded self-healing
//! lifecycle. Platforms, containers and notification transports are supplied
//! by the embedding program.

// Module declarations
pub mod services;
pub mod types;
pub mod utils;

pub use services::core::admin::{AdminGate, AdminManager, AdminState};
pub use services::core::calendar::{
    AlwaysOpenCalendar, BusinessCalendar, CalendarConfig, HolidayCalendar, HolidayManager,
    WorkingTimeOracle,
};
pub use services::core::infrastructure::chaos_engineering::{
    bind_methods, ChaosEngineeringConfig, ChaosScheduler, Container, Experiment,
    ExperimentHandle, ExperimentMethod, ExperimentMethodDescriptor, ExperimentMethodSelector,
    ExperimentOrchestrator, ExperimentState, ExperimentSuite, ExperimentTimingConfig, MethodSpec,
    Platform, ScheduledPlatform,
};
pub use services::core::infrastructure::notification_module::{
    ChaosNotification, NotificationManager, NotificationSink,
};
pub use types::{ContainerHealth, ExperimentType, NotificationLevel};
pub use utils::{ChaosError, ChaosResult};
