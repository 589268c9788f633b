// Driver behaviour end to end: waves, backoff, manual targeting, suite replay
// and isolation of a panicking experiment

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chaos_engine::services::core::infrastructure::chaos_engineering::experiment_suite::ExperimentCriteria;
use chaos_engine::utils::error::{codes, ExperimentFailure};
use chaos_engine::utils::time::ManualClock;
use chaos_engine::{
    AdminState, AlwaysOpenCalendar, ChaosEngineeringConfig, ChaosScheduler, ExperimentOrchestrator,
    ExperimentState, ExperimentSuite, HolidayManager, NotificationManager, ScheduledPlatform,
};
use common::mock_services::{
    monday_morning, FixedGate, FixedGaussian, MockContainer, MockPlatform, RecordingSink,
};

struct Fleet {
    clock: Arc<ManualClock>,
    gate: Arc<FixedGate>,
    sink: Arc<RecordingSink>,
    web1: Arc<MockContainer>,
    orchestrator: ExperimentOrchestrator,
}

fn config() -> ChaosEngineeringConfig {
    ChaosEngineeringConfig {
        destruction_probability: 1.0,
        worker_pool_size: 2,
        ..ChaosEngineeringConfig::default()
    }
}

fn fleet(config: ChaosEngineeringConfig) -> Fleet {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let gate = FixedGate::new(AdminState::Started);
    let sink = RecordingSink::new();
    let notifications = Arc::new(NotificationManager::new().with_sink(sink.clone()));
    let holidays = Arc::new(HolidayManager::new(Arc::new(AlwaysOpenCalendar), clock.clone()));

    let web1 = MockContainer::in_aggregation("web-1", "web");
    let web2 = MockContainer::in_aggregation("web-2", "web");
    let db1 = MockContainer::in_aggregation("db-1", "db");
    let platform = MockPlatform::new("fleet", vec![web1.clone(), web2, db1]);

    // Cold start with a zero gaussian lands a little over three hours out
    let scheduler = ChaosScheduler::builder()
        .with_average_millis_between_experiments(config.average_millis_between_experiments)
        .with_working_time_oracle(holidays.clone())
        .with_clock(clock.clone())
        .with_gaussian_source(Box::new(FixedGaussian::constant(0.0)))
        .build()
        .unwrap();
    let scheduled = ScheduledPlatform::new(platform, scheduler, &config, clock.clone()).with_seed(1);
    // Fix the first chaos time relative to Monday morning
    scheduled.next_chaos_time().unwrap();

    let orchestrator = ExperimentOrchestrator::new(config, gate.clone(), notifications, clock.clone())
        .with_holiday_manager(holidays)
        .with_scheduled_platform(scheduled)
        .with_seed(3);

    Fleet {
        clock,
        gate,
        sink,
        web1,
        orchestrator,
    }
}

async fn drain(fleet: &Fleet) {
    for _ in 0..200 {
        if !fleet.orchestrator.has_active_experiments() {
            return;
        }
        fleet.clock.advance_seconds(60);
        fleet.orchestrator.update_experiment_status().await;
    }
    panic!("experiments did not complete");
}

#[tokio::test]
async fn test_nothing_scheduled_before_next_chaos_time() {
    let fleet = fleet(config());
    assert!(fleet.orchestrator.schedule_experiments(false).await.unwrap().is_empty());

    fleet.clock.advance_seconds(3 * 3600);
    assert!(fleet.orchestrator.schedule_experiments(false).await.unwrap().is_empty());
    assert_eq!(fleet.orchestrator.statistics().experiments_started, 0);
}

#[tokio::test]
async fn test_wave_runs_to_completion_then_backs_off() {
    let fleet = fleet(config());
    fleet.clock.advance_seconds(4 * 3600);

    let wave = fleet.orchestrator.schedule_experiments(false).await.unwrap();
    assert_eq!(wave.len(), 3);
    assert!(fleet.orchestrator.schedule_experiments(false).await.unwrap().is_empty());

    let history = fleet.orchestrator.historical_suites();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].1.platform_type, "fleet");
    assert_eq!(history[0].1.experiment_count(), 3);

    fleet.orchestrator.update_experiment_status().await;
    for id in &wave {
        let snapshot = fleet.orchestrator.get_experiment(id).unwrap();
        assert_eq!(snapshot.state, ExperimentState::Started);
    }

    drain(&fleet).await;
    let stats = fleet.orchestrator.statistics();
    assert_eq!(stats.experiments_started, 3);
    assert_eq!(stats.experiments_finished, 3);
    assert_eq!(stats.experiments_failed, 0);
    assert!(stats.last_experiment_complete.is_some());

    let finished = fleet
        .sink
        .transitions()
        .into_iter()
        .filter(|(_, next)| *next == ExperimentState::Finished)
        .count();
    assert_eq!(finished, 3);

    assert!(fleet.orchestrator.in_backoff_period());
    assert!(fleet.orchestrator.schedule_experiments(false).await.unwrap().is_empty());
    assert_eq!(fleet.orchestrator.schedule_experiments(true).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_admin_gate_blocks_new_waves() {
    let fleet = fleet(config());
    fleet.clock.advance_seconds(4 * 3600);
    fleet.gate.set(AdminState::Paused);

    assert!(fleet.orchestrator.schedule_experiments(false).await.unwrap().is_empty());
    assert!(fleet.orchestrator.schedule_experiments(true).await.unwrap().is_empty());

    fleet.gate.set(AdminState::Started);
    assert_eq!(fleet.orchestrator.schedule_experiments(false).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_zero_destruction_probability_schedules_nothing() {
    let fleet = fleet(ChaosEngineeringConfig {
        destruction_probability: 0.0,
        ..config()
    });
    fleet.clock.advance_seconds(4 * 3600);
    assert!(fleet.orchestrator.schedule_experiments(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_experiment_container_by_identity() {
    let fleet = fleet(config());

    let ids = fleet.orchestrator.experiment_container("db-1").await.unwrap();
    assert_eq!(ids.len(), 1);
    let snapshot = fleet.orchestrator.get_experiment(&ids[0]).unwrap();
    assert_eq!(snapshot.target_identity, "db-1");

    // Already under experiment
    assert!(fleet.orchestrator.experiment_container("db-1").await.unwrap().is_empty());
    assert!(fleet.orchestrator.experiment_container("cache-9").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_suite_replay_targets_specific_container() {
    let fleet = fleet(config());
    let criteria = ExperimentCriteria::new("web", vec!["cpu_burn".to_string()])
        .with_specific_targets(vec!["web-2".to_string()])
        .unwrap();
    let suite = ExperimentSuite::new("fleet", vec![criteria]);

    let ids = fleet.orchestrator.schedule_experiment_suite(&suite).await.unwrap();
    assert_eq!(ids.len(), 1);
    let snapshot = fleet.orchestrator.get_experiment(&ids[0]).unwrap();
    assert_eq!(snapshot.target_identity, "web-2");
    assert_eq!(snapshot.method_name, "cpu_burn");
    assert_eq!(fleet.orchestrator.historical_suites()[0].1, suite);

    let err = fleet.orchestrator.schedule_experiment_suite(&suite).await.unwrap_err();
    assert_eq!(err.error_code, Some(codes::ANOTHER_EXPERIMENT_IN_PROGRESS));
}

#[tokio::test]
async fn test_suite_replay_fills_unassigned_methods_randomly() {
    let fleet = fleet(config());
    let suite = ExperimentSuite::new(
        "fleet",
        vec![ExperimentCriteria::new("web", vec!["observe".to_string()])],
    );

    let ids = fleet.orchestrator.schedule_experiment_suite(&suite).await.unwrap();
    assert_eq!(ids.len(), 1);
    let snapshot = fleet.orchestrator.get_experiment(&ids[0]).unwrap();
    assert!(snapshot.target_identity.starts_with("web-"));
    assert_eq!(snapshot.aggregation_identifier, "web");
}

#[tokio::test]
async fn test_suite_replay_errors() {
    let fleet = fleet(config());

    let unknown = ExperimentSuite::new("nowhere", vec![]);
    let err = fleet.orchestrator.schedule_experiment_suite(&unknown).await.unwrap_err();
    assert_eq!(err.error_code, Some(codes::PLATFORM_DOES_NOT_EXIST));

    // Two methods against two containers would leave no survivor
    let greedy = ExperimentSuite::new(
        "fleet",
        vec![ExperimentCriteria::new(
            "web",
            vec!["cpu_burn".to_string(), "observe".to_string()],
        )],
    );
    let err = fleet.orchestrator.schedule_experiment_suite(&greedy).await.unwrap_err();
    assert_eq!(
        err.error_code,
        Some(codes::NOT_ENOUGH_CONTAINERS_FOR_PLANNED_EXPERIMENT)
    );
    assert!(!fleet.orchestrator.has_active_experiments());
}

#[tokio::test]
async fn test_panicking_experiment_does_not_disturb_others() {
    let fleet = fleet(config());
    fleet.web1.panic_on_start.store(true, Ordering::SeqCst);

    let wave = fleet.orchestrator.schedule_experiments(true).await.unwrap();
    assert_eq!(wave.len(), 3);

    fleet.orchestrator.update_experiment_status().await;
    let stats = fleet.orchestrator.statistics();
    assert_eq!(stats.experiments_failed, 1);
    assert_eq!(stats.active_experiments, 2);
    assert_eq!(stats.active_by_state[&ExperimentState::Started], 2);

    let failed = fleet
        .sink
        .events()
        .into_iter()
        .find(|e| e.new_state == ExperimentState::Failed)
        .unwrap();
    assert_eq!(failed.target_identity, "web-1");
    assert!(matches!(failed.error, Some(ExperimentFailure::StartFailure(_))));

    drain(&fleet).await;
    assert_eq!(fleet.orchestrator.statistics().experiments_finished, 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_schedules_and_stops_on_shutdown() {
    let fleet = fleet(config());
    fleet.clock.advance_seconds(4 * 3600);
    let orchestrator = Arc::new(fleet.orchestrator);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let driver = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(shutdown_rx).await })
    };

    tokio::time::sleep(std::time::Duration::from_secs(40)).await;
    shutdown_tx.send(true).unwrap();
    driver.await.unwrap();

    let stats = orchestrator.statistics();
    assert_eq!(stats.experiments_started, 3);
    assert_eq!(stats.active_experiments, 3);
    assert!(orchestrator
        .active_experiments()
        .iter()
        .all(|snapshot| snapshot.state == ExperimentState::Started));
}
