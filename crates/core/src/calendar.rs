//! Calendar arithmetic for the model clock.

use jiff::{
    Span, Unit,
    civil::{Date, date},
};

/// The calendar unit a model timestep is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeUnit {
    Day,
    Month,
}

/// The length of one model timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimestepSize {
    pub unit: TimeUnit,
    pub magnitude: u16,
}

impl TimestepSize {
    /// A timestep of `n` days.
    #[must_use]
    pub fn days(n: u16) -> Self {
        Self {
            unit: TimeUnit::Day,
            magnitude: n.max(1),
        }
    }

    /// A timestep of `n` calendar months.
    #[must_use]
    pub fn months(n: u16) -> Self {
        Self {
            unit: TimeUnit::Month,
            magnitude: n.max(1),
        }
    }

    /// Returns the date `steps` timesteps after `start`.
    ///
    /// Each date is computed from `start` directly, so month steps starting on
    /// the 31st do not drift after passing a short month.
    ///
    /// # Errors
    ///
    /// Fails if the result is outside the supported date range.
    pub fn advance(&self, start: Date, steps: i64) -> Result<Date, jiff::Error> {
        let amount = steps * i64::from(self.magnitude);
        let span = match self.unit {
            TimeUnit::Day => Span::new().try_days(amount)?,
            TimeUnit::Month => Span::new().try_months(amount)?,
        };
        start.checked_add(span)
    }

    /// Returns how many whole timesteps lie between `from` and `to`.
    ///
    /// Negative when `to` is before `from`.
    ///
    /// # Errors
    ///
    /// Fails if the dates cannot be differenced.
    pub fn steps_between(&self, from: Date, to: Date) -> Result<i64, jiff::Error> {
        let whole = match self.unit {
            TimeUnit::Day => i64::from(from.until((Unit::Day, to))?.get_days()),
            TimeUnit::Month => i64::from(from.until((Unit::Month, to))?.get_months()),
        };
        Ok(whole.div_euclid(i64::from(self.magnitude)))
    }
}

impl Default for TimestepSize {
    fn default() -> Self {
        Self::days(1)
    }
}

/// The date context visible to equations during one timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Clock {
    pub(crate) timestep: i64,
    pub(crate) date: Date,
}

impl Clock {
    pub(crate) fn new(timestep: i64, date: Date) -> Self {
        Self { timestep, date }
    }

    /// The clock seen while recording dependencies.
    pub(crate) fn recording() -> Self {
        Self::new(-1, date(1999, 1, 1))
    }

    pub(crate) fn day_of_year(&self) -> u16 {
        u16::try_from(self.date.day_of_year()).unwrap_or(1)
    }

    pub(crate) fn days_in_year(&self) -> u16 {
        u16::try_from(self.date.days_in_year()).unwrap_or(365)
    }

    pub(crate) fn days_in_month(&self) -> u8 {
        u8::try_from(self.date.days_in_month()).unwrap_or(30)
    }
}
