// src/services/core/calendar/business_calendar.rs

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc, Weekday};

use super::{CalendarConfig, HolidayCalendar};
use crate::utils::error::ChaosResult;

/// Fixed business hours with an explicit holiday list.
#[derive(Debug, Clone)]
pub struct BusinessCalendar {
    name: String,
    start_hour: u32,
    end_hour: u32,
    offset: FixedOffset,
    holidays: BTreeSet<NaiveDate>,
}

impl BusinessCalendar {
    pub fn new(name: impl Into<String>, start_hour: u32, end_hour: u32) -> Self {
        Self {
            name: name.into(),
            start_hour,
            end_hour,
            offset: Utc.fix(),
            holidays: BTreeSet::new(),
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, holidays: I) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Add the bridge days around mid-week holidays (Monday before a Tuesday
    /// holiday, Friday after a Thursday holiday) and the observed weekday for
    /// holidays landing on a weekend.
    pub fn with_linked_days(mut self) -> Self {
        let linked = linked_days(&self.holidays);
        self.holidays.extend(linked);
        self
    }

    pub fn from_config(config: &CalendarConfig) -> ChaosResult<Self> {
        config.validate()?;
        let calendar = Self::new(config.name.clone(), config.start_hour, config.end_hour)
            .with_offset(config.offset()?)
            .with_holidays(config.holidays.iter().copied());
        Ok(if config.include_linked_days {
            calendar.with_linked_days()
        } else {
            calendar
        })
    }

    pub fn holidays(&self) -> impl Iterator<Item = &NaiveDate> {
        self.holidays.iter()
    }
}

pub fn linked_days(holidays: &BTreeSet<NaiveDate>) -> BTreeSet<NaiveDate> {
    holidays
        .iter()
        .filter_map(|day| match day.weekday() {
            Weekday::Sun | Weekday::Thu => Some(*day + Duration::days(1)),
            Weekday::Sat | Weekday::Tue => Some(*day - Duration::days(1)),
            _ => None,
        })
        .collect()
}

impl HolidayCalendar for BusinessCalendar {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_holiday(&self, day: NaiveDate) -> bool {
        self.holidays.contains(&day)
    }

    fn start_of_day(&self) -> u32 {
        self.start_hour
    }

    fn end_of_day(&self) -> u32 {
        self.end_hour
    }

    fn utc_offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Every instant counts as working time.
#[derive(Debug, Clone, Default)]
pub struct AlwaysOpenCalendar;

impl HolidayCalendar for AlwaysOpenCalendar {
    fn name(&self) -> &str {
        "always-open"
    }

    fn is_holiday(&self, _day: NaiveDate) -> bool {
        false
    }

    fn is_weekend(&self, _day: NaiveDate) -> bool {
        false
    }

    fn start_of_day(&self) -> u32 {
        0
    }

    fn end_of_day(&self) -> u32 {
        24
    }
}
