//! Calendar views over the entry list.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::model::Entry;

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
}

/// Days of `year`-`month` that have at least one entry.
pub fn entries_within(year: i32, month: u32, entries: &[Entry]) -> BTreeSet<u32> {
    entries
        .iter()
        .filter(|e| e.date.year() == year && e.date.month() == month)
        .map(|e| e.date.day())
        .collect()
}

/// Entries written on `date`, most recent first.
///
/// Entries carrying a creation time sort by it; entries without one (older
/// imports) come after them, ordered by their time-prefixed id. Ties on the
/// timestamp fall back to the id as well.
pub fn entries_on(date: NaiveDate, entries: &[Entry]) -> Vec<Entry> {
    let mut out: Vec<Entry> = entries.iter().filter(|e| e.date == date).cloned().collect();
    out.sort_by_cached_key(|e| {
        let created = e
            .created_at
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());
        Reverse((created, e.id.clone()))
    });
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalendarCell {
    Blank,
    Day {
        day: u32,
        date: NaiveDate,
        is_today: bool,
        has_entry: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    /// Blank cells before the 1st in a Monday-first week.
    pub leading_blanks: u32,
    pub cells: Vec<CalendarCell>,
}

pub fn days_in_month(year: i32, month: u32) -> Result<u32, CalendarError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(CalendarError::InvalidMonth { year, month })?;
    let (ny, nm) = next_month(year, month);
    let next_first = NaiveDate::from_ymd_opt(ny, nm, 1).ok_or(CalendarError::InvalidMonth { year, month })?;
    Ok((next_first - first).num_days() as u32)
}

pub fn month_grid(
    year: i32,
    month: u32,
    today: NaiveDate,
    marked: &BTreeSet<u32>,
) -> Result<MonthGrid, CalendarError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(CalendarError::InvalidMonth { year, month })?;
    let leading_blanks = first.weekday().num_days_from_monday();
    let days = days_in_month(year, month)?;

    let mut cells = Vec::with_capacity((leading_blanks + days) as usize);
    cells.extend((0..leading_blanks).map(|_| CalendarCell::Blank));
    for (day, date) in (1..=days).zip(first.iter_days()) {
        cells.push(CalendarCell::Day {
            day,
            date,
            is_today: date == today,
            has_entry: marked.contains(&day),
        });
    }

    Ok(MonthGrid {
        year,
        month,
        leading_blanks,
        cells,
    })
}

pub fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month <= 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}
