//! Periodicity resolver: turns a recurrence rule into occurrence dates.

use chrono::{Datelike, Months, NaiveDate, TimeDelta, Weekday};

use crate::model::{Periodicity, PeriodicityType};
use cadence_core::error::{CadenceError, Result};

/// Build a selected date from legacy day/month/year parts.
/// Impossible combinations (Feb 30, Feb 29 on a common year) yield `None`.
pub fn selected_date_from_parts(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

impl Periodicity {
    /// Check the rule's own invariants.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(CadenceError::validation(format!(
                    "periodicity start_date {start} is after end_date {end}"
                )));
            }
        }
        Ok(())
    }

    fn within_bounds(&self, date: NaiveDate) -> bool {
        self.start_date.is_none_or(|s| date >= s) && self.end_date.is_none_or(|e| date <= e)
    }

    /// Date recurrences are counted from.
    pub fn anchor(&self) -> Option<NaiveDate> {
        match self.kind {
            PeriodicityType::Monthly => self.selected_date.or(self.start_date),
            _ => self.start_date,
        }
    }

    fn step(&self) -> u32 {
        self.interval.max(1)
    }

    /// Whether the rule has an occurrence on `date`.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        match self.kind {
            PeriodicityType::Once => self.start_date == Some(date),
            PeriodicityType::Always | PeriodicityType::Daily => self.within_bounds(date),
            PeriodicityType::Weekday => {
                self.within_bounds(date) && !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
            }
            PeriodicityType::Weekly => {
                if !self.within_bounds(date) {
                    return false;
                }
                let Some(anchor) = self.anchor() else {
                    return true;
                };
                let days = (date - anchor).num_days();
                days >= 0 && days % (7 * i64::from(self.step())) == 0
            }
            PeriodicityType::Monthly => {
                if !self.within_bounds(date) {
                    return false;
                }
                let Some(anchor) = self.anchor() else {
                    return true;
                };
                let months = (i64::from(date.year()) - i64::from(anchor.year())) * 12
                    + i64::from(date.month())
                    - i64::from(anchor.month());
                if months < 0 || months % i64::from(self.step()) != 0 {
                    return false;
                }
                let day = anchor.day().min(last_day_of_month(date.year(), date.month()));
                date.day() == day
            }
        }
    }

    /// First occurrence on or after `from`, computed without walking the
    /// calendar day by day.
    pub fn next_occurrence(&self, from: NaiveDate) -> Option<NaiveDate> {
        let base = self.start_date.map_or(from, |s| s.max(from));
        let candidate = match self.kind {
            PeriodicityType::Once => self.start_date.filter(|s| *s >= from)?,
            PeriodicityType::Always | PeriodicityType::Daily => base,
            PeriodicityType::Weekday => {
                let mut day = base;
                while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                    day = day.succ_opt()?;
                }
                day
            }
            PeriodicityType::Weekly => match self.anchor() {
                None => base,
                Some(anchor) => {
                    let period = 7 * i64::from(self.step());
                    let days = (base - anchor).num_days().max(0);
                    let k = (days + period - 1) / period;
                    anchor.checked_add_signed(TimeDelta::try_days(k.checked_mul(period)?)?)?
                }
            },
            PeriodicityType::Monthly => match self.anchor() {
                None => base,
                Some(anchor) => {
                    let step = i64::from(self.step());
                    let month_index = |d: NaiveDate| i64::from(d.year()) * 12 + i64::from(d.month0());
                    let behind = (month_index(base) - month_index(anchor)).max(0);
                    let mut k = (behind + step - 1) / step * step;
                    let mut day = monthly_date(anchor, k)?;
                    if day < base {
                        k = k.checked_add(step)?;
                        day = monthly_date(anchor, k)?;
                    }
                    day
                }
            },
        };
        self.end_date.is_none_or(|e| candidate <= e).then_some(candidate)
    }

    /// Occurrence dates inside the inclusive window `[from, to]`.
    pub fn occurrences(&self, from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> + '_ {
        std::iter::successors(self.next_occurrence(from), move |d| {
            d.succ_opt().and_then(|next| self.next_occurrence(next))
        })
        .take_while(move |d| *d <= to)
    }

    /// Whether any occurrence falls inside `[from, to]`.
    pub fn intersects(&self, from: NaiveDate, to: NaiveDate) -> bool {
        from <= to && self.next_occurrence(from).is_some_and(|d| d <= to)
    }
}

/// The anchor's day of month, `months` months after the anchor, clamped
/// to the target month's last day.
fn monthly_date(anchor: NaiveDate, months: i64) -> Option<NaiveDate> {
    let index = (i64::from(anchor.year()) * 12 + i64::from(anchor.month0())).checked_add(months)?;
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    NaiveDate::from_ymd_opt(year, month, anchor.day().min(last_day_of_month(year, month)))
}
