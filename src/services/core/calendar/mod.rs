// src/services/core/calendar/mod.rs

//! Working-time calendar
//!
//! Experiments only count time that falls inside business hours on working
//! days. A [`HolidayCalendar`] describes those hours and days; the
//! [`HolidayManager`] turns a calendar into a [`WorkingTimeOracle`] that the
//! scheduler uses to place the next experiment.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::utils::error::{ChaosError, ChaosResult};

pub mod business_calendar;
pub mod holiday_manager;

pub use business_calendar::{AlwaysOpenCalendar, BusinessCalendar};
pub use holiday_manager::HolidayManager;

/// Maps a start instant plus an amount of working time to a wall-clock instant.
pub trait WorkingTimeOracle: Send + Sync {
    fn instant_after_working_millis(
        &self,
        start: DateTime<Utc>,
        working_time: Duration,
    ) -> ChaosResult<DateTime<Utc>>;
}

/// Business hours, weekends and holidays for one locale.
pub trait HolidayCalendar: Send + Sync {
    fn name(&self) -> &str;

    fn is_holiday(&self, day: NaiveDate) -> bool;

    fn is_weekend(&self, day: NaiveDate) -> bool {
        matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Hour of day (0-23) at which work starts
    fn start_of_day(&self) -> u32;

    /// Hour of day (1-24) at which work ends
    fn end_of_day(&self) -> u32;

    fn utc_offset(&self) -> FixedOffset {
        Utc.fix()
    }

    fn is_working_day(&self, day: NaiveDate) -> bool {
        !self.is_weekend(day) && !self.is_holiday(day)
    }

    fn is_working_hours(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.utc_offset());
        if !self.is_working_day(local.date_naive()) {
            return false;
        }
        let start = self.local_instant(local.date_naive(), self.start_of_day());
        let end = self.local_instant(local.date_naive(), self.end_of_day());
        match (start, end) {
            (Some(start), Some(end)) => local >= start && local < end,
            _ => false,
        }
    }

    /// `day` at `hour` in the calendar's offset. `hour` may be 24.
    fn local_instant(&self, day: NaiveDate, hour: u32) -> Option<DateTime<FixedOffset>> {
        let midnight = day.and_hms_opt(0, 0, 0)?;
        let local = midnight + Duration::hours(i64::from(hour));
        self.utc_offset().from_local_datetime(&local).single()
    }
}

/// Calendar settings carried in the engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarConfig {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    /// Also treat the bridge day next to a Tuesday/Thursday holiday as off
    #[serde(default)]
    pub include_linked_days: bool,
    /// Ignore hours, weekends and holidays entirely
    #[serde(default)]
    pub always_open: bool,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            name: "business".to_string(),
            start_hour: 9,
            end_hour: 17,
            utc_offset_minutes: 0,
            holidays: Vec::new(),
            include_linked_days: false,
            always_open: false,
        }
    }
}

impl CalendarConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if self.always_open {
            return Ok(());
        }
        if self.end_hour > 24 {
            return Err(ChaosError::config_error("calendar end_hour must be at most 24"));
        }
        if self.start_hour >= self.end_hour {
            return Err(ChaosError::config_error(
                "calendar start_hour must be before end_hour",
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ChaosError::config_error(
                "calendar utc_offset_minutes must be within one day",
            ));
        }
        Ok(())
    }

    pub fn offset(&self) -> ChaosResult<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ChaosError::config_error(format!(
                "Invalid UTC offset: {} minutes",
                self.utc_offset_minutes
            ))
        })
    }
}
