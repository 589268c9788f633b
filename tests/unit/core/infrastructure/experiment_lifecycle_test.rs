// Experiment state machine driven tick by tick against simulated time

#[path = "../../../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chaos_engine::services::core::infrastructure::chaos_engineering::SelfHealingBlock;
use chaos_engine::utils::error::ExperimentFailure;
use chaos_engine::utils::time::ManualClock;
use chaos_engine::{
    AdminState, Container, ContainerHealth, Experiment, ExperimentState, ExperimentTimingConfig,
    NotificationLevel, NotificationManager,
};
use chrono::Duration;
use common::mock_services::{monday_morning, FixedGate, MockContainer, RecordingSink};

struct Harness {
    clock: Arc<ManualClock>,
    gate: Arc<FixedGate>,
    sink: Arc<RecordingSink>,
    container: Arc<MockContainer>,
    experiment: Experiment,
}

impl Harness {
    fn new(container: Arc<MockContainer>, method: &str, timing: ExperimentTimingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let gate = FixedGate::new(AdminState::Started);
        let sink = RecordingSink::new();
        let notifications = Arc::new(NotificationManager::new().with_sink(sink.clone()));
        let target: Arc<dyn Container> = container.clone();
        let experiment = Experiment::builder(&target, container.method(method))
            .with_timing(timing)
            .with_admin_gate(gate.clone())
            .with_notifications(notifications)
            .with_clock(clock.clone())
            .build()
            .unwrap();
        Self {
            clock,
            gate,
            sink,
            container,
            experiment,
        }
    }

    fn with_defaults(method: &str) -> Self {
        Self::new(MockContainer::new("web-1"), method, ExperimentTimingConfig::default())
    }

    async fn advance_after(&mut self, seconds: i64) -> ExperimentState {
        self.clock.advance_seconds(seconds);
        self.experiment.advance().await
    }
}

fn timing_with_retries(retries: u32) -> ExperimentTimingConfig {
    ExperimentTimingConfig {
        maximum_self_healing_retries: retries,
        ..ExperimentTimingConfig::default()
    }
}

#[tokio::test]
async fn test_recovery_path_visits_every_level_in_order() {
    let mut harness = Harness::with_defaults("cpu_burn");

    assert_eq!(harness.experiment.advance().await, ExperimentState::Started);
    assert_eq!(harness.advance_after(301).await, ExperimentState::Finalizing);
    assert_eq!(harness.advance_after(30).await, ExperimentState::Finished);

    let transitions = harness.sink.transitions();
    assert_eq!(
        transitions,
        vec![
            (ExperimentState::Created, ExperimentState::Starting),
            (ExperimentState::Starting, ExperimentState::Started),
            (ExperimentState::Started, ExperimentState::SelfHealing),
            (ExperimentState::SelfHealing, ExperimentState::Finalizing),
            (ExperimentState::Finalizing, ExperimentState::Finished),
        ]
    );
    for (previous, next) in transitions {
        assert_eq!(next.level(), previous.level() + 1);
    }
    assert_eq!(harness.container.finalizations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_levels_never_decrease_until_terminal() {
    let mut harness = Harness::new(
        MockContainer::new("web-1").never_recovers(),
        "cpu_burn",
        timing_with_retries(2),
    );

    let mut previous = harness.experiment.advance().await;
    for _ in 0..40 {
        let state = harness.advance_after(60).await;
        assert!(state.level() >= previous.level());
        previous = state;
    }
    assert_eq!(previous, ExperimentState::Failed);
    assert!(!harness
        .sink
        .transitions()
        .contains(&(ExperimentState::Started, ExperimentState::Finished)));
}

#[tokio::test]
async fn test_self_healing_stops_after_configured_retries() {
    let mut harness = Harness::new(
        MockContainer::new("web-1").never_recovers(),
        "cpu_burn",
        timing_with_retries(3),
    );

    harness.experiment.advance().await;
    assert_eq!(harness.advance_after(301).await, ExperimentState::SelfHealing);
    assert_eq!(harness.container.heals(), 1);

    let mut state = ExperimentState::SelfHealing;
    for _ in 0..120 {
        state = harness.advance_after(60).await;
        if state.is_complete() {
            break;
        }
    }
    assert_eq!(state, ExperimentState::Failed);
    assert_eq!(harness.container.heals(), 3);
    assert_eq!(
        harness.experiment.last_error(),
        Some(&ExperimentFailure::MaximumSelfHealingRetriesReached(3))
    );

    for _ in 0..10 {
        harness.advance_after(600).await;
    }
    assert_eq!(harness.container.heals(), 3);
}

#[tokio::test]
async fn test_retry_waits_for_self_healing_interval() {
    let mut harness = Harness::new(
        MockContainer::new("web-1").never_recovers(),
        "cpu_burn",
        timing_with_retries(5),
    );

    harness.experiment.advance().await;
    harness.advance_after(301).await;
    assert_eq!(harness.container.heals(), 1);

    assert_eq!(harness.advance_after(299).await, ExperimentState::SelfHealing);
    assert_eq!(harness.container.heals(), 1);
    assert_eq!(
        harness.experiment.blocked(),
        Some(&SelfHealingBlock::Interval {
            remaining_seconds: 1
        })
    );

    harness.advance_after(1).await;
    assert_eq!(harness.container.heals(), 2);
    assert_eq!(harness.experiment.self_healing_attempts(), 2);
}

#[tokio::test]
async fn test_healthy_target_stays_started_until_minimum_duration() {
    let mut harness = Harness::with_defaults("observe");
    assert_eq!(harness.experiment.advance().await, ExperimentState::Started);

    for _ in 0..30 {
        assert_eq!(harness.advance_after(1).await, ExperimentState::Started);
    }
    assert_eq!(harness.advance_after(1).await, ExperimentState::Finalizing);
}

#[tokio::test]
async fn test_paused_gate_defers_self_healing() {
    let mut harness = Harness::with_defaults("cpu_burn");
    harness.experiment.advance().await;
    harness.gate.set(AdminState::Paused);

    assert_eq!(harness.advance_after(301).await, ExperimentState::Started);
    assert_eq!(harness.container.heals(), 0);
    assert_eq!(
        harness.experiment.blocked(),
        Some(&SelfHealingBlock::AdminState {
            state: AdminState::Paused
        })
    );

    assert_eq!(harness.advance_after(3600).await, ExperimentState::Started);
    assert_eq!(harness.container.heals(), 0);

    harness.gate.set(AdminState::Started);
    assert_eq!(harness.advance_after(15).await, ExperimentState::Finalizing);
    assert_eq!(harness.container.heals(), 1);
    assert!(harness.experiment.blocked().is_none());
}

#[tokio::test]
async fn test_drain_still_allows_self_healing() {
    let mut harness = Harness::with_defaults("cpu_burn");
    harness.experiment.advance().await;
    harness.gate.set(AdminState::Drain);

    assert_eq!(harness.advance_after(301).await, ExperimentState::Finalizing);
    assert_eq!(harness.container.heals(), 1);
}

#[tokio::test]
async fn test_abort_heals_immediately() {
    let mut harness = Harness::with_defaults("cpu_burn");
    harness.experiment.advance().await;
    harness.gate.set(AdminState::Abort);

    assert_eq!(harness.advance_after(1).await, ExperimentState::SelfHealing);
    assert_eq!(harness.container.heals(), 1);
    assert_eq!(harness.advance_after(30).await, ExperimentState::Finalizing);
    assert_eq!(harness.container.heals(), 1);
    assert_eq!(harness.advance_after(30).await, ExperimentState::Finished);
}

#[tokio::test]
async fn test_abort_does_not_finalize_inside_minimum_duration() {
    let mut harness = Harness::with_defaults("observe");
    harness.experiment.advance().await;
    harness.gate.set(AdminState::Abort);

    assert_eq!(harness.advance_after(1).await, ExperimentState::SelfHealing);
    assert_eq!(harness.experiment.self_healing_attempts(), 1);
    assert_eq!(harness.container.heals(), 0);
    assert!(!harness
        .sink
        .transitions()
        .contains(&(ExperimentState::Started, ExperimentState::Finalizing)));

    assert_eq!(harness.advance_after(20).await, ExperimentState::SelfHealing);
    assert_eq!(harness.advance_after(10).await, ExperimentState::Finalizing);
    assert_eq!(harness.experiment.self_healing_attempts(), 1);
}

#[tokio::test]
async fn test_method_without_self_healing_waits_for_recovery() {
    let mut harness = Harness::with_defaults("observe");
    harness.experiment.advance().await;
    harness.container.set_health(ContainerHealth::RunningExperiment);

    assert_eq!(harness.advance_after(301).await, ExperimentState::SelfHealing);
    assert_eq!(harness.experiment.self_healing_attempts(), 1);
    assert!(harness.experiment.last_error().is_none());

    harness.container.set_health(ContainerHealth::Normal);
    assert_eq!(harness.advance_after(120).await, ExperimentState::Finalizing);
    assert_eq!(harness.experiment.self_healing_attempts(), 1);
    assert_eq!(harness.advance_after(30).await, ExperimentState::Finished);
}

#[tokio::test]
async fn test_method_without_self_healing_fails_after_retries() {
    let mut harness = Harness::new(MockContainer::new("web-1"), "observe", timing_with_retries(2));
    harness.experiment.advance().await;
    harness.container.set_health(ContainerHealth::RunningExperiment);

    assert_eq!(harness.advance_after(301).await, ExperimentState::SelfHealing);
    assert_eq!(harness.advance_after(299).await, ExperimentState::SelfHealing);
    assert_eq!(harness.experiment.self_healing_attempts(), 1);

    assert_eq!(harness.advance_after(1).await, ExperimentState::Failed);
    assert_eq!(harness.experiment.self_healing_attempts(), 2);
    assert_eq!(
        harness.experiment.last_error(),
        Some(&ExperimentFailure::MaximumSelfHealingRetriesReached(2))
    );
}

#[tokio::test]
async fn test_finalizing_window_resets_on_flapping_health() {
    let mut harness = Harness::with_defaults("observe");
    harness.experiment.advance().await;
    assert_eq!(harness.advance_after(31).await, ExperimentState::Finalizing);

    harness.container.set_health(ContainerHealth::RunningExperiment);
    assert_eq!(harness.advance_after(20).await, ExperimentState::Finalizing);

    harness.container.set_health(ContainerHealth::Normal);
    assert_eq!(harness.advance_after(20).await, ExperimentState::Finalizing);
    assert_eq!(harness.advance_after(10).await, ExperimentState::Finished);
}

#[tokio::test]
async fn test_finalizing_gives_up_after_timeout() {
    let timing = ExperimentTimingConfig {
        finalization_timeout_seconds: 120,
        ..ExperimentTimingConfig::default()
    };
    let mut harness = Harness::new(MockContainer::new("web-1"), "observe", timing);
    harness.experiment.advance().await;
    assert_eq!(harness.advance_after(31).await, ExperimentState::Finalizing);

    harness.container.set_health(ContainerHealth::RunningExperiment);
    assert_eq!(harness.advance_after(60).await, ExperimentState::Finalizing);
    assert_eq!(harness.advance_after(61).await, ExperimentState::Failed);
    assert_eq!(
        harness.experiment.last_error(),
        Some(&ExperimentFailure::FinalizationTimeout(120))
    );
}

#[tokio::test]
async fn test_missing_target_fails_experiment() {
    let mut harness = Harness::with_defaults("cpu_burn");
    harness.experiment.advance().await;

    harness.container.set_health(ContainerHealth::DoesNotExist);
    assert_eq!(harness.advance_after(5).await, ExperimentState::Failed);
    assert_eq!(
        harness.experiment.last_error(),
        Some(&ExperimentFailure::TargetMissing)
    );
}

#[tokio::test]
async fn test_start_failure_is_terminal() {
    let container = MockContainer::new("web-1");
    container.fail_start.store(true, Ordering::SeqCst);
    let mut harness = Harness::new(container, "cpu_burn", ExperimentTimingConfig::default());

    assert_eq!(harness.experiment.advance().await, ExperimentState::Failed);
    assert!(matches!(
        harness.experiment.last_error(),
        Some(ExperimentFailure::StartFailure(_))
    ));
    assert_eq!(
        harness.sink.transitions(),
        vec![
            (ExperimentState::Created, ExperimentState::Starting),
            (ExperimentState::Starting, ExperimentState::Failed),
        ]
    );

    let failed = harness.sink.events().pop().unwrap();
    assert_eq!(failed.level, NotificationLevel::Error);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_unhealthy_target_is_not_started() {
    let container = MockContainer::new("web-1");
    container.set_health(ContainerHealth::RunningExperiment);
    let mut harness = Harness::new(container, "cpu_burn", ExperimentTimingConfig::default());

    assert_eq!(harness.experiment.advance().await, ExperimentState::Failed);
    assert_eq!(
        harness.experiment.last_error(),
        Some(&ExperimentFailure::TargetUnhealthy)
    );
    assert_eq!(harness.container.invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_self_healing_error_is_terminal() {
    let container = MockContainer::new("web-1");
    container.fail_heal.store(true, Ordering::SeqCst);
    let mut harness = Harness::new(container, "cpu_burn", ExperimentTimingConfig::default());

    harness.experiment.advance().await;
    assert_eq!(harness.advance_after(301).await, ExperimentState::Failed);
    assert!(matches!(
        harness.experiment.last_error(),
        Some(ExperimentFailure::SelfHealingError(_))
    ));
}

#[tokio::test]
async fn test_method_descriptor_overrides_durations() {
    let harness = Harness::with_defaults("terminate");
    assert_eq!(harness.experiment.minimum_duration(), Duration::seconds(60));
    assert_eq!(harness.experiment.maximum_duration(), Duration::seconds(600));

    let snapshot = harness.experiment.snapshot();
    assert_eq!(snapshot.state, ExperimentState::Created);
    assert_eq!(snapshot.target_identity, "web-1");
}
