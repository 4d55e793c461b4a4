//! Seeded timeline: days and hourly ticks.
//!
//! This module:
//!   1. Resolves a day's environment from its integer seed
//!   2. Resolves each hour's tick snapshot from (day seed, hour)
//!   3. Creates day and tick rows idempotently (first writer wins)
//!
//! Draw order on the environment stream is fixed:
//!   weather → temperature → base demand → event roll → event pick.
//! Changing it changes every seeded day, so append new draws at the end.

use crate::{
    clock,
    error::SimResult,
    rng::SeededRng,
    snapshot::{
        EnvironmentOverride, EnvironmentSnapshot, TickSnapshot, TickSnapshotOverride, Weather,
    },
    store::SimStore,
    types::{new_id, DayId, DayNumber, DayStatus, Hour, InsertOutcome, TickId, TickStatus},
};
use serde::{Deserialize, Serialize};

pub const SPECIAL_EVENT_PROBABILITY: f64 = 0.10;

/// Day-level events a seeded environment can roll.
pub const SPECIAL_EVENTS: [&str; 5] = [
    "festival",
    "farmers_market",
    "heat_wave",
    "sports_game",
    "road_construction",
];

struct HourPattern {
    hour: Hour,
    min_multiplier: f64,
    max_multiplier: f64,
    event: Option<&'static str>,
}

/// Ramp-up, lunch peak, afternoon lull, late pickup.
const HOUR_PATTERN: &[HourPattern] = &[
    HourPattern { hour: 9,  min_multiplier: 0.40, max_multiplier: 0.60, event: None },
    HourPattern { hour: 10, min_multiplier: 0.60, max_multiplier: 0.80, event: None },
    HourPattern { hour: 11, min_multiplier: 0.80, max_multiplier: 1.00, event: None },
    HourPattern { hour: 12, min_multiplier: 1.30, max_multiplier: 1.60, event: Some("lunch_rush") },
    HourPattern { hour: 13, min_multiplier: 1.00, max_multiplier: 1.30, event: None },
    HourPattern { hour: 14, min_multiplier: 0.60, max_multiplier: 0.80, event: Some("afternoon_lull") },
    HourPattern { hour: 15, min_multiplier: 0.70, max_multiplier: 0.90, event: None },
    HourPattern { hour: 16, min_multiplier: 0.90, max_multiplier: 1.20, event: Some("after_school_rush") },
];

// ── Records ──────────────────────────────────────────────────────────────────

/// Row from the `day` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub day_id:        DayId,
    pub simulation_id: String,
    pub day_number:    DayNumber,
    pub seed:          u64,
    pub environment:   EnvironmentSnapshot,
    pub status:        DayStatus,
    pub error:         Option<String>,
    pub started_at:    Option<String>,
    pub finished_at:   Option<String>,
}

/// Row from the `tick` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick_id:       TickId,
    pub simulation_id: String,
    pub day_id:        DayId,
    pub day_number:    DayNumber,
    pub hour:          Hour,
    pub snapshot:      TickSnapshot,
    pub status:        TickStatus,
    pub error:         Option<String>,
    pub started_at:    Option<String>,
    pub finished_at:   Option<String>,
}

// ── Pure resolution ──────────────────────────────────────────────────────────

/// Resolve a day's environment from its seed.
///
/// An override is merged over the seeded values: fields it sets win,
/// fields it leaves out keep their seeded value.
pub fn resolve_environment(seed: u64, over: Option<&EnvironmentOverride>) -> EnvironmentSnapshot {
    let mut rng = SeededRng::for_environment(seed);

    let weather = *rng.pick(&Weather::ALL);
    let (t_min, t_max) = weather.temperature_range();
    let temperature = rng.range_i64(t_min, t_max);
    let (d_min, d_max) = weather.base_demand_range();
    let base_demand = rng.range_i64(d_min, d_max) as u32;
    let special_event = if rng.chance(SPECIAL_EVENT_PROBABILITY) {
        Some(rng.pick(&SPECIAL_EVENTS).to_string())
    } else {
        None
    };

    let seeded = EnvironmentSnapshot {
        weather,
        temperature,
        base_demand,
        special_event,
    };
    match over {
        Some(o) => o.apply(seeded),
        None => seeded,
    }
}

/// Resolve one hour's demand multiplier and event label.
pub fn resolve_tick_snapshot(
    day_seed: u64,
    hour: Hour,
    over: Option<&TickSnapshotOverride>,
) -> TickSnapshot {
    let mut rng = SeededRng::for_hour(day_seed, hour);
    let seeded = match HOUR_PATTERN.iter().find(|p| p.hour == hour) {
        Some(p) => TickSnapshot {
            demand_multiplier: round2(rng.range_f64(p.min_multiplier, p.max_multiplier)),
            event: p.event.map(str::to_string),
        },
        None => TickSnapshot {
            demand_multiplier: 1.0,
            event: None,
        },
    };
    match over {
        Some(o) => o.apply(seeded),
        None => seeded,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ── Idempotent creation ──────────────────────────────────────────────────────

/// Get or create the day row. The first caller's seed and environment win;
/// later calls with a different seed get the original row back unchanged.
pub fn ensure_day(
    store: &SimStore,
    simulation_id: &str,
    day_number: DayNumber,
    seed: u64,
    over: Option<&EnvironmentOverride>,
) -> SimResult<DayRecord> {
    if let Some(existing) = store.day_by_number(simulation_id, day_number)? {
        return Ok(existing);
    }

    let candidate = DayRecord {
        day_id: new_id(),
        simulation_id: simulation_id.to_string(),
        day_number,
        seed,
        environment: resolve_environment(seed, over),
        status: DayStatus::Pending,
        error: None,
        started_at: None,
        finished_at: None,
    };
    if store.insert_day_if_absent(&candidate)? == InsertOutcome::Existing {
        log::debug!("day={day_number} timeline: lost creation race, reading winner's row");
    }
    // Read back: under a race, the winner's row is the canonical one.
    store
        .day_by_number(simulation_id, day_number)?
        .ok_or_else(|| crate::error::SimError::not_found("day", format!("{simulation_id}/{day_number}")))
}

/// Get or create the tick row for (day, hour) with the same first-writer-wins rule.
pub fn ensure_tick(
    store: &SimStore,
    day: &DayRecord,
    hour: Hour,
    over: Option<&TickSnapshotOverride>,
) -> SimResult<TickRecord> {
    debug_assert!(clock::is_business_hour(hour), "hour {hour} outside business hours");

    if let Some(existing) = store.tick_by_hour(&day.simulation_id, day.day_number, hour)? {
        return Ok(existing);
    }

    let candidate = TickRecord {
        tick_id: new_id(),
        simulation_id: day.simulation_id.clone(),
        day_id: day.day_id.clone(),
        day_number: day.day_number,
        hour,
        snapshot: resolve_tick_snapshot(day.seed, hour, over),
        status: TickStatus::Pending,
        error: None,
        started_at: None,
        finished_at: None,
    };
    if store.insert_tick_if_absent(&candidate)? == InsertOutcome::Existing {
        log::debug!(
            "day={} hour={hour} timeline: lost creation race, reading winner's row",
            day.day_number
        );
    }
    store
        .tick_by_hour(&day.simulation_id, day.day_number, hour)?
        .ok_or_else(|| {
            crate::error::SimError::not_found(
                "tick",
                format!("{}/{}/{hour}", day.simulation_id, day.day_number),
            )
        })
}

/// Mark a day running (clears finish time and error) or terminal.
pub fn update_day_status(
    store: &SimStore,
    day_id: &str,
    status: DayStatus,
    error: Option<&str>,
) -> SimResult<()> {
    store.update_day_status(day_id, status, error)
}

/// Mark a tick running (clears finish time and error) or terminal.
pub fn update_tick_status(
    store: &SimStore,
    tick_id: &str,
    status: TickStatus,
    error: Option<&str>,
) -> SimResult<()> {
    store.update_tick_status(tick_id, status, error)
}
