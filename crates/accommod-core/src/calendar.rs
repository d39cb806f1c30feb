//! Calendar primitives: half-open periods and the academic year.
//!
//! Every handler that needs to know "which year does this belong to" goes
//! through [`AcademicYear`]; nothing else in the workspace does date
//! arithmetic on September boundaries.

use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Month in which an academic year starts.
pub const ACADEMIC_YEAR_START_MONTH: u32 = 9;

/// Upper bound on the number of academic years a single period is expanded
/// into by [`AcademicYear::spanning`]. The most recent years are kept.
pub const MAX_SPANNED_YEARS: usize = 6;

// ─── Period ──────────────────────────────────────────────────────────────────

/// A half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
  pub start: NaiveDate,
  /// Exclusive. `None` means the period is still running.
  pub end:   Option<NaiveDate>,
}

impl Period {
  /// Build a period, rejecting an end that is not strictly after the start.
  pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Result<Self> {
    if let Some(end) = end
      && end <= start
    {
      return Err(Error::InvalidPeriod { start, end });
    }
    Ok(Self { start, end })
  }

  /// An open-ended period starting at `start`.
  pub fn open(start: NaiveDate) -> Self { Self { start, end: None } }

  pub fn covers(&self, date: NaiveDate) -> bool {
    self.start <= date && self.end.is_none_or(|end| date < end)
  }

  /// Last day inside the period, if it is bounded.
  pub fn last_day(&self) -> Option<NaiveDate> {
    self.end.and_then(|end| end.pred_opt())
  }
}

// ─── AcademicYear ────────────────────────────────────────────────────────────

/// The window `[September 1 of Y, September 1 of Y+1)`, identified by `Y`.
///
/// Not persisted on its own; derived records store the start year and every
/// boundary is recomputed from it.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AcademicYear {
  start_year: i32,
}

impl AcademicYear {
  pub const fn new(start_year: i32) -> Self { Self { start_year } }

  pub const fn start_year(self) -> i32 { self.start_year }

  /// The academic year containing `date`.
  pub fn containing(date: NaiveDate) -> Self {
    let start_year = if date.month() >= ACADEMIC_YEAR_START_MONTH {
      date.year()
    } else {
      date.year() - 1
    };
    Self { start_year }
  }

  /// The academic year containing `today`.
  pub fn current(today: NaiveDate) -> Self { Self::containing(today) }

  /// Pick the year to evaluate for a subject given its own periods
  /// (accommodation or opinion validity windows).
  ///
  /// Among the periods covering `today`, the one that started last is the
  /// most relevant and the year containing its start wins. With no active
  /// period, this is [`AcademicYear::current`].
  pub fn for_periods(periods: &[Period], today: NaiveDate) -> Self {
    periods
      .iter()
      .filter(|p| p.covers(today))
      .map(|p| p.start)
      .max()
      .map_or_else(|| Self::current(today), Self::containing)
  }

  /// Every academic year `period` intersects, oldest first.
  ///
  /// An open-ended period is considered to run up to `today` (or its own
  /// start, if that is later). At most [`MAX_SPANNED_YEARS`] years are
  /// returned.
  pub fn spanning(period: &Period, today: NaiveDate) -> Vec<Self> {
    let first = Self::containing(period.start);
    let last_day = period.last_day().unwrap_or_else(|| today.max(period.start));
    let last = Self::containing(last_day).max(first);

    let floor = last
      .start_year
      .saturating_sub(MAX_SPANNED_YEARS as i32 - 1)
      .max(first.start_year);
    (floor..=last.start_year).map(Self::new).collect()
  }

  /// First day of the year (inclusive).
  pub fn start(self) -> NaiveDate { september_first(self.start_year) }

  /// First day of the following year (exclusive).
  pub fn end(self) -> NaiveDate { september_first(self.start_year.saturating_add(1)) }

  pub fn contains(self, date: NaiveDate) -> bool { Self::containing(date) == self }

  pub fn next(self) -> Self { Self::new(self.start_year.saturating_add(1)) }

  pub fn period(self) -> Period {
    Period { start: self.start(), end: Some(self.end()) }
  }

  /// The date derived values for this year are evaluated at: `today` while
  /// the year is running, its first day otherwise.
  pub fn reference_date(self, today: NaiveDate) -> NaiveDate {
    if self.contains(today) { today } else { self.start() }
  }
}

/// Saturates at the calendar bounds supported by `chrono`.
fn september_first(year: i32) -> NaiveDate {
  NaiveDate::from_ymd_opt(year, ACADEMIC_YEAR_START_MONTH, 1).unwrap_or(
    if year < 0 {
      NaiveDate::MIN
    } else {
      NaiveDate::MAX
    },
  )
}

impl fmt::Display for AcademicYear {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.start_year, i64::from(self.start_year) + 1)
  }
}

/// Accepts either the start year (`2024`) or the label (`2024-2025`).
///
/// Both boundaries must be dates `chrono` can represent.
impl FromStr for AcademicYear {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let invalid = || Error::InvalidAcademicYear(s.to_string());
    let start: i32 = match s.split_once('-') {
      None => s.parse::<i32>().map_err(|_| invalid())?,
      Some((start, end)) => {
        let start: i32 = start.parse().map_err(|_| invalid())?;
        let end: i32 = end.parse().map_err(|_| invalid())?;
        if start.checked_add(1) != Some(end) {
          return Err(invalid());
        }
        start
      }
    };
    let next = start.checked_add(1).ok_or_else(invalid)?;
    if NaiveDate::from_ymd_opt(start, ACADEMIC_YEAR_START_MONTH, 1).is_none()
      || NaiveDate::from_ymd_opt(next, ACADEMIC_YEAR_START_MONTH, 1).is_none()
    {
      return Err(invalid());
    }
    Ok(Self::new(start))
  }
}
