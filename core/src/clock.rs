//! Business-hour clock: the fixed set of hourly ticks in a simulated day.
//!
//! A day always runs hours 9..=16 in order. Each hour's competitor view
//! depends on the previous hour being durable, so navigation between
//! ticks lives here rather than in the orchestrators.

use crate::types::{DayNumber, Hour};

pub const OPENING_HOUR: Hour = 9;
pub const CLOSING_HOUR: Hour = 16;

/// Every tick hour of a day, in execution order.
pub fn business_hours() -> impl Iterator<Item = Hour> {
    OPENING_HOUR..=CLOSING_HOUR
}

pub fn ticks_per_day() -> usize {
    (CLOSING_HOUR - OPENING_HOUR + 1) as usize
}

pub fn is_business_hour(hour: Hour) -> bool {
    (OPENING_HOUR..=CLOSING_HOUR).contains(&hour)
}

/// The tick immediately before (day, hour).
///
/// The first hour of a day looks back to the previous day's closing hour.
/// Day 1 at opening has no predecessor.
pub fn previous_tick(day: DayNumber, hour: Hour) -> Option<(DayNumber, Hour)> {
    if hour > OPENING_HOUR {
        Some((day, hour - 1))
    } else if day > 1 {
        Some((day - 1, CLOSING_HOUR))
    } else {
        None
    }
}
