// src/services/core/calendar/holiday_manager.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

use super::{AlwaysOpenCalendar, BusinessCalendar, CalendarConfig, HolidayCalendar, WorkingTimeOracle};
use crate::utils::error::{ChaosError, ChaosResult};
use crate::utils::time::Clock;

/// Upper bound on days walked when converting working time to wall time
const MAX_DAYS_WALKED: u32 = 3_660;

/// Answers working-time questions for one calendar.
pub struct HolidayManager {
    calendar: Arc<dyn HolidayCalendar>,
    clock: Arc<dyn Clock>,
}

impl HolidayManager {
    pub fn new(calendar: Arc<dyn HolidayCalendar>, clock: Arc<dyn Clock>) -> Self {
        log::info!("Holiday manager is using the {} calendar", calendar.name());
        Self { calendar, clock }
    }

    pub fn from_config(config: &CalendarConfig, clock: Arc<dyn Clock>) -> ChaosResult<Self> {
        let calendar: Arc<dyn HolidayCalendar> = if config.always_open {
            Arc::new(AlwaysOpenCalendar)
        } else {
            Arc::new(BusinessCalendar::from_config(config)?)
        };
        Ok(Self::new(calendar, clock))
    }

    pub fn calendar(&self) -> &Arc<dyn HolidayCalendar> {
        &self.calendar
    }

    fn offset(&self) -> FixedOffset {
        self.calendar.utc_offset()
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.offset()).date_naive()
    }

    pub fn is_holiday(&self) -> bool {
        self.calendar.is_holiday(self.today())
    }

    pub fn is_outside_working_hours(&self) -> bool {
        !self.calendar.is_working_hours(self.clock.now())
    }

    /// Most recent working day strictly before today.
    pub fn previous_working_day(&self) -> ChaosResult<NaiveDate> {
        let mut day = self.today();
        for _ in 0..MAX_DAYS_WALKED {
            day = day.pred_opt().ok_or_else(|| {
                ChaosError::internal_error("Ran out of calendar looking for a working day")
            })?;
            if self.calendar.is_working_day(day) {
                return Ok(day);
            }
        }
        Err(ChaosError::config_error(format!(
            "Calendar {} has no working day in the last {} days",
            self.calendar.name(),
            MAX_DAYS_WALKED
        )))
    }

    /// Working time left between now and the end of today's business hours.
    pub fn time_left_in_day(&self) -> Duration {
        let now = self.clock.now().with_timezone(&self.offset());
        self.working_time_left(now)
    }

    /// Working time between `from` and the end of its day. May move `from`
    /// forward to the start of business hours.
    fn working_time_left(&self, from: DateTime<FixedOffset>) -> Duration {
        let day = from.date_naive();
        if !self.calendar.is_working_day(day) {
            return Duration::zero();
        }
        let (start, end) = match (
            self.calendar.local_instant(day, self.calendar.start_of_day()),
            self.calendar.local_instant(day, self.calendar.end_of_day()),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => return Duration::zero(),
        };
        let from = from.max(start);
        if from >= end {
            Duration::zero()
        } else {
            end - from
        }
    }

    fn next_midnight(&self, from: DateTime<FixedOffset>) -> ChaosResult<DateTime<FixedOffset>> {
        from.date_naive()
            .succ_opt()
            .and_then(|day| self.calendar.local_instant(day, 0))
            .ok_or_else(|| ChaosError::internal_error("Ran out of calendar walking forward"))
    }
}

impl WorkingTimeOracle for HolidayManager {
    fn instant_after_working_millis(
        &self,
        start: DateTime<Utc>,
        working_time: Duration,
    ) -> ChaosResult<DateTime<Utc>> {
        let mut cursor = start.with_timezone(&self.offset());
        let mut remaining = working_time.max(Duration::zero());

        for _ in 0..MAX_DAYS_WALKED {
            let day = cursor.date_naive();
            if self.calendar.is_working_day(day) {
                if let Some(start_of_work) =
                    self.calendar.local_instant(day, self.calendar.start_of_day())
                {
                    cursor = cursor.max(start_of_work);
                }
            }
            let left = self.working_time_left(cursor);
            if !left.is_zero() && left >= remaining {
                return Ok((cursor + remaining).with_timezone(&Utc));
            }
            remaining -= left;
            cursor = self.next_midnight(cursor)?;
        }

        Err(ChaosError::config_error(format!(
            "Calendar {} has no working time within {} days of {}",
            self.calendar.name(),
            MAX_DAYS_WALKED,
            start
        )))
    }
}
