//! Calendar-to-period conversion
//!
//! All dates reduce to integer period indices at the edge of the simulator;
//! inside the loop only whole months exist. Conversions use UTC calendar
//! components so results do not depend on the host time zone.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Month within the calendar year at which the UK tax year rolls over
/// (0-indexed: 3 = April).
pub const TAX_YEAR_START_MONTH0: u32 = 3;

/// Fixed simulation calendar: a start year/month and a horizon in periods.
///
/// Period 0 is `(start_year, start_month)`; period t is t whole months
/// later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimClock {
    pub start_year: i32,

    /// 1-12
    pub start_month: u32,

    /// Total number of periods in the projection
    pub periods: u32,
}

impl SimClock {
    pub fn new(start_year: i32, start_month: u32, periods: u32) -> Self {
        Self {
            start_year,
            start_month,
            periods,
        }
    }

    /// Clock starting at the current UTC year/month
    pub fn starting_now(periods: u32) -> Self {
        let now = Utc::now();
        Self::new(now.year(), now.month(), periods)
    }

    /// Convert a calendar date to a period index, clamped at 0.
    /// Dates beyond the horizon map past `periods`; callers decide whether
    /// out-of-horizon effects are dropped.
    pub fn period_of(&self, date: NaiveDate) -> u32 {
        let months = (date.year() - self.start_year) * 12 + date.month() as i32
            - self.start_month as i32;
        months.max(0) as u32
    }

    /// Calendar (year, month 1-12) of a period index
    pub fn date_of(&self, period: u32) -> (i32, u32) {
        let total = self.start_year * 12 + (self.start_month as i32 - 1) + period as i32;
        (total.div_euclid(12), total.rem_euclid(12) as u32 + 1)
    }

    /// Calendar month of a period, 0-indexed (0 = January)
    pub fn month0_of(&self, period: u32) -> u32 {
        self.date_of(period).1 - 1
    }

    /// UK tax year label for a period: the calendar year the tax year
    /// started in (April 2026 .. March 2027 is tax year 2026).
    pub fn tax_year_of(&self, period: u32) -> i32 {
        let (year, month) = self.date_of(period);
        if month - 1 >= TAX_YEAR_START_MONTH0 {
            year
        } else {
            year - 1
        }
    }

    /// Render a period as "YYYY-MM" for result output
    pub fn label_of(&self, period: u32) -> String {
        let (year, month) = self.date_of(period);
        format!("{year:04}-{month:02}")
    }
}
