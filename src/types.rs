use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MemberId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ContributionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LoanId(pub u64);

/// Contribution month. One contribution is due per member per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Period {
    pub year: i32,
    /// 1-based calendar month.
    pub month: u32,
}

impl Period {
    pub fn of(date: NaiveDate) -> Self {
        Period { year: date.year(), month: date.month() }
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Period { year: self.year + 1, month: 1 }
        } else {
            Period { year: self.year, month: self.month + 1 }
        }
    }

    /// The due date inside this period, clamped to the last day of short months.
    pub fn due_date(self, due_day: u32) -> Option<NaiveDate> {
        let first = self.first_day()?;
        let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
        NaiveDate::from_ymd_opt(self.year, self.month, due_day.min(last.day()))
    }
}

/// Round a display amount to whole minor units (half away from zero).
/// Only used when a figure is persisted or charged.
pub fn to_minor_units(amount: f64) -> u64 {
    if amount.is_finite() && amount > 0.0 { amount.round() as u64 } else { 0 }
}
