// Working-time arithmetic over business hours, weekends and holidays

#[path = "../../../common/mod.rs"]
mod common;

use std::sync::Arc;

use chaos_engine::utils::time::ManualClock;
use chaos_engine::{
    AlwaysOpenCalendar, BusinessCalendar, CalendarConfig, ChaosScheduler, HolidayCalendar,
    HolidayManager, WorkingTimeOracle,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use common::mock_services::FixedGaussian;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    // March 2024: the 4th is a Monday
    Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn manager(calendar: impl HolidayCalendar + 'static, now: DateTime<Utc>) -> HolidayManager {
    HolidayManager::new(Arc::new(calendar), Arc::new(ManualClock::new(now)))
}

fn business() -> BusinessCalendar {
    BusinessCalendar::new("test", 9, 17)
}

#[test]
fn test_working_time_within_one_day() {
    let manager = manager(business(), at(4, 10, 0));
    let end = manager
        .instant_after_working_millis(at(4, 10, 0), Duration::hours(2))
        .unwrap();
    assert_eq!(end, at(4, 12, 0));
}

#[test]
fn test_working_time_ending_exactly_at_close() {
    let manager = manager(business(), at(4, 9, 0));
    let end = manager
        .instant_after_working_millis(at(4, 9, 0), Duration::hours(8))
        .unwrap();
    assert_eq!(end, at(4, 17, 0));
}

#[test]
fn test_working_time_rolls_into_next_morning() {
    let manager = manager(business(), at(4, 16, 0));
    let end = manager
        .instant_after_working_millis(at(4, 16, 0), Duration::hours(2))
        .unwrap();
    assert_eq!(end, at(5, 10, 0));
}

#[test]
fn test_start_before_opening_is_clamped() {
    let manager = manager(business(), at(4, 6, 0));
    let end = manager
        .instant_after_working_millis(at(4, 6, 0), Duration::minutes(90))
        .unwrap();
    assert_eq!(end, at(4, 10, 30));
}

#[test]
fn test_weekend_is_skipped() {
    let manager = manager(business(), at(8, 16, 0));
    let end = manager
        .instant_after_working_millis(at(8, 16, 0), Duration::hours(2))
        .unwrap();
    assert_eq!(end, at(11, 10, 0));

    let from_saturday = manager
        .instant_after_working_millis(at(9, 12, 0), Duration::hours(1))
        .unwrap();
    assert_eq!(from_saturday, at(11, 10, 0));
}

#[test]
fn test_holidays_are_skipped() {
    let calendar = business().with_holidays([date(5)]);
    let manager = manager(calendar, at(4, 16, 0));
    let end = manager
        .instant_after_working_millis(at(4, 16, 0), Duration::hours(2))
        .unwrap();
    assert_eq!(end, at(6, 10, 0));
}

#[test]
fn test_linked_day_after_thursday_holiday() {
    let calendar = business().with_holidays([date(7)]).with_linked_days();
    assert!(calendar.is_holiday(date(8)));

    let manager = manager(calendar, at(6, 16, 0));
    let end = manager
        .instant_after_working_millis(at(6, 16, 0), Duration::hours(2))
        .unwrap();
    assert_eq!(end, at(11, 10, 0));
}

#[test]
fn test_offset_calendar_uses_local_hours() {
    let calendar = business().with_offset(FixedOffset::east_opt(2 * 3600).unwrap());
    // 06:00 UTC is 08:00 local, an hour before opening
    let manager = manager(calendar, at(4, 6, 0));
    let end = manager
        .instant_after_working_millis(at(4, 6, 0), Duration::hours(1))
        .unwrap();
    assert_eq!(end, at(4, 8, 0));
}

#[test]
fn test_always_open_calendar_is_wall_clock() {
    let manager = manager(AlwaysOpenCalendar, at(9, 23, 0));
    let end = manager
        .instant_after_working_millis(at(9, 23, 0), Duration::hours(36))
        .unwrap();
    assert_eq!(end, at(11, 11, 0));
    assert!(!manager.is_holiday());
    assert!(!manager.is_outside_working_hours());
}

#[test]
fn test_working_hour_queries_follow_clock() {
    let clock = Arc::new(ManualClock::new(at(4, 10, 0)));
    let manager = HolidayManager::new(Arc::new(business().with_holidays([date(5)])), clock.clone());
    assert!(!manager.is_holiday());
    assert!(!manager.is_outside_working_hours());
    assert_eq!(manager.time_left_in_day(), Duration::hours(7));

    clock.set(at(4, 18, 0));
    assert!(manager.is_outside_working_hours());
    assert_eq!(manager.time_left_in_day(), Duration::zero());

    clock.set(at(5, 11, 0));
    assert!(manager.is_holiday());
    assert!(manager.is_outside_working_hours());
}

#[test]
fn test_previous_working_day_skips_weekend() {
    let manager = manager(business(), at(11, 10, 0));
    assert_eq!(manager.previous_working_day().unwrap(), date(8));
}

struct NeverOpen;

impl HolidayCalendar for NeverOpen {
    fn name(&self) -> &str {
        "never"
    }

    fn is_holiday(&self, _day: NaiveDate) -> bool {
        true
    }

    fn start_of_day(&self) -> u32 {
        9
    }

    fn end_of_day(&self) -> u32 {
        17
    }
}

#[test]
fn test_calendar_without_working_days_is_an_error() {
    let manager = manager(NeverOpen, at(4, 10, 0));
    assert!(manager
        .instant_after_working_millis(at(4, 10, 0), Duration::hours(1))
        .is_err());
    assert!(manager.previous_working_day().is_err());
}

#[test]
fn test_from_config_builds_business_calendar() {
    let config = CalendarConfig {
        holidays: vec![date(5)],
        ..CalendarConfig::default()
    };
    let manager = HolidayManager::from_config(&config, Arc::new(ManualClock::new(at(5, 10, 0)))).unwrap();
    assert!(manager.is_holiday());

    let bad = CalendarConfig {
        start_hour: 18,
        ..CalendarConfig::default()
    };
    assert!(HolidayManager::from_config(&bad, Arc::new(ManualClock::new(at(5, 10, 0)))).is_err());
}

#[test]
fn test_scheduler_places_friday_evening_start_into_monday() {
    let clock = Arc::new(ManualClock::new(at(8, 16, 0)));
    let oracle = Arc::new(HolidayManager::new(Arc::new(business()), clock.clone()));
    // A factor of one: the next experiment is exactly two working hours away
    let gaussian = FixedGaussian::constant(
        chaos_engine::services::core::infrastructure::chaos_engineering::chaos_scheduler::RAMANUJAN_SOLDNER_CONSTANT
            - 1.0,
    );
    let mut scheduler = ChaosScheduler::builder()
        .with_average_millis_between_experiments(2 * 3_600_000)
        .with_working_time_oracle(oracle)
        .with_clock(clock)
        .with_gaussian_source(Box::new(gaussian))
        .build()
        .unwrap();

    let next = scheduler.get_next_chaos_time().unwrap();
    assert!((next - at(11, 10, 0)).num_milliseconds().abs() <= 1);
}
