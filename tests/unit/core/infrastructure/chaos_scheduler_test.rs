// Scheduler timing: caching, consumption, jitter shape and first-interval bias

#[path = "../../../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chaos_engine::services::core::infrastructure::chaos_engineering::chaos_scheduler::RAMANUJAN_SOLDNER_CONSTANT;
use chaos_engine::utils::time::{Clock, ManualClock};
use chaos_engine::{ChaosResult, ChaosScheduler, WorkingTimeOracle};
use chrono::{DateTime, Duration, Utc};
use common::mock_services::{monday_morning, FixedGaussian};

const FOUR_HOURS_MILLIS: u64 = 14_400_000;

/// Working time equals wall-clock time
struct Elapsed;

impl WorkingTimeOracle for Elapsed {
    fn instant_after_working_millis(
        &self,
        start: DateTime<Utc>,
        working_time: Duration,
    ) -> ChaosResult<DateTime<Utc>> {
        Ok(start + working_time)
    }
}

fn scheduler(clock: Arc<ManualClock>, gaussian: FixedGaussian) -> ChaosScheduler {
    ChaosScheduler::builder()
        .with_average_millis_between_experiments(FOUR_HOURS_MILLIS)
        .with_working_time_oracle(Arc::new(Elapsed))
        .with_clock(clock)
        .with_gaussian_source(Box::new(gaussian))
        .build()
        .unwrap()
}

fn seeded(clock: Arc<ManualClock>, seed: u64) -> ChaosScheduler {
    ChaosScheduler::builder()
        .with_average_millis_between_experiments(FOUR_HOURS_MILLIS)
        .with_working_time_oracle(Arc::new(Elapsed))
        .with_clock(clock)
        .with_seed(seed)
        .build()
        .unwrap()
}

#[test]
fn test_next_chaos_time_is_cached_until_consumed() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let mut scheduler = seeded(clock.clone(), 17);

    let first = scheduler.get_next_chaos_time().unwrap();
    clock.advance_seconds(3600);
    let second = scheduler.get_next_chaos_time().unwrap();

    assert_eq!(first, second);
    assert_eq!(scheduler.peek_next_chaos_time(), Some(first));
}

#[test]
fn test_start_experiment_consumes_next_time() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let mut scheduler = seeded(clock, 23);

    let next = scheduler.get_next_chaos_time().unwrap();
    scheduler.start_experiment();
    assert_eq!(scheduler.last_chaos_time(), Some(next));
    assert_eq!(scheduler.peek_next_chaos_time(), None);

    let recomputed = scheduler.get_next_chaos_time().unwrap();
    assert_ne!(recomputed, next);
    assert!(recomputed > next);
}

#[test]
fn test_scaling_factor_samples_are_bounded() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let mut scheduler = seeded(clock, 99);

    // g in (0.01, 0.99999) maps to these bounds
    let floor = (1.0f64 - 0.01).ln() / 0.5f64.ln();
    let ceiling = (1.0f64 - 0.99999).ln() / 0.5f64.ln();

    let samples: Vec<f64> = (0..10_000).map(|_| scheduler.scaling_factor()).collect();
    for sample in &samples {
        assert!(sample.is_finite());
        assert!(*sample > 0.0);
        assert!(*sample > floor && *sample < ceiling, "sample {}", sample);
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    assert!(mean > 0.3 && mean < 2.0, "mean {}", mean);
}

#[test]
fn test_rejected_draws_are_skipped() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    // g == 0, g above 0.99999 and g below 0.01 are all rejected
    let gaussian = FixedGaussian::new(&[-1.0, 2.0 * 2f64.sqrt() - 0.9, -0.98], 0.0);
    let draws = gaussian.draws.clone();
    let mut scheduler = scheduler(clock, gaussian);

    let expected = (1.0 - 0.5 / RAMANUJAN_SOLDNER_CONSTANT).ln() / 0.5f64.ln();
    let factor = scheduler.scaling_factor();

    assert!((factor - expected).abs() < 1e-12);
    assert_eq!(draws.load(Ordering::SeqCst), 4);
}

#[test]
fn test_first_interval_uses_square_root_of_factor() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let mut scheduler = scheduler(clock.clone(), FixedGaussian::constant(0.0));

    let cold = scheduler.get_next_chaos_time().unwrap();
    assert_eq!(cold, clock.now() + Duration::milliseconds(11_240_648));

    scheduler.start_experiment();
    let warm = scheduler.get_next_chaos_time().unwrap();
    assert_eq!(warm, cold + Duration::milliseconds(8_774_457));
}

#[test]
fn test_unit_factor_gives_average_on_both_paths() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    // (g + 1) * 0.5 / K == 0.5 yields a factor of exactly one
    let gaussian = FixedGaussian::constant(RAMANUJAN_SOLDNER_CONSTANT - 1.0);
    let mut scheduler = scheduler(clock.clone(), gaussian);
    let average = Duration::milliseconds(FOUR_HOURS_MILLIS as i64);

    let cold = scheduler.get_next_chaos_time().unwrap();
    assert!((cold - (clock.now() + average)).num_milliseconds().abs() <= 1);

    scheduler.start_experiment();
    let warm = scheduler.get_next_chaos_time().unwrap();
    assert!((warm - (cold + average)).num_milliseconds().abs() <= 1);
}

#[test]
fn test_warm_start_uses_configured_last_time() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let last = monday_morning() - Duration::hours(1);
    let mut scheduler = ChaosScheduler::builder()
        .with_average_millis_between_experiments(FOUR_HOURS_MILLIS)
        .with_working_time_oracle(Arc::new(Elapsed))
        .with_clock(clock)
        .with_last_chaos_time(last)
        .with_gaussian_source(Box::new(FixedGaussian::constant(0.0)))
        .build()
        .unwrap();

    assert_eq!(
        scheduler.get_next_chaos_time().unwrap(),
        last + Duration::milliseconds(8_774_457)
    );
}

#[test]
fn test_independent_schedulers_do_not_interfere() {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let mut first = scheduler(clock.clone(), FixedGaussian::constant(0.0));
    let mut second = scheduler(clock, FixedGaussian::constant(0.0));

    let a = first.get_next_chaos_time().unwrap();
    first.start_experiment();
    first.get_next_chaos_time().unwrap();

    assert_eq!(second.get_next_chaos_time().unwrap(), a);
    assert_eq!(second.last_chaos_time(), None);
}
