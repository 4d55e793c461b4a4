//! Day and tick rows.

use super::{insert_outcome, json_column, SimStore};
use crate::{
    error::{SimError, SimResult},
    timeline::{DayRecord, TickRecord},
    types::{now_timestamp, DayNumber, DayStatus, Hour, InsertOutcome, TickStatus},
};
use rusqlite::{params, OptionalExtension, Row};

const DAY_COLUMNS: &str = "day_id, simulation_id, day_number, seed, environment_json,
                           status, error, started_at, finished_at";

const TICK_COLUMNS: &str = "tick_id, simulation_id, day_id, day_number, hour, snapshot_json,
                            status, error, started_at, finished_at";

fn day_from_row(r: &Row<'_>) -> rusqlite::Result<DayRecord> {
    Ok(DayRecord {
        day_id: r.get(0)?,
        simulation_id: r.get(1)?,
        day_number: r.get(2)?,
        seed: r.get::<_, i64>(3)? as u64,
        environment: json_column(r, 4)?,
        status: DayStatus::parse(&r.get::<_, String>(5)?),
        error: r.get(6)?,
        started_at: r.get(7)?,
        finished_at: r.get(8)?,
    })
}

fn tick_from_row(r: &Row<'_>) -> rusqlite::Result<TickRecord> {
    Ok(TickRecord {
        tick_id: r.get(0)?,
        simulation_id: r.get(1)?,
        day_id: r.get(2)?,
        day_number: r.get(3)?,
        hour: r.get(4)?,
        snapshot: json_column(r, 5)?,
        status: TickStatus::parse(&r.get::<_, String>(6)?),
        error: r.get(7)?,
        started_at: r.get(8)?,
        finished_at: r.get(9)?,
    })
}

impl SimStore {
    // ── Day ────────────────────────────────────────────────────

    /// Insert unless a day with the same (simulation, day_number) exists.
    pub fn insert_day_if_absent(&self, day: &DayRecord) -> SimResult<InsertOutcome> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO day (
                day_id, simulation_id, day_number, seed, environment_json, status, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                day.day_id,
                day.simulation_id,
                day.day_number,
                day.seed as i64,
                serde_json::to_string(&day.environment)?,
                day.status.as_str(),
                now_timestamp(),
            ],
        )?;
        Ok(insert_outcome(changed))
    }

    pub fn day_by_number(
        &self,
        simulation_id: &str,
        day_number: DayNumber,
    ) -> SimResult<Option<DayRecord>> {
        let day = self
            .conn()
            .query_row(
                &format!("SELECT {DAY_COLUMNS} FROM day WHERE simulation_id = ?1 AND day_number = ?2"),
                params![simulation_id, day_number],
                day_from_row,
            )
            .optional()?;
        Ok(day)
    }

    pub fn get_day(&self, day_id: &str) -> SimResult<DayRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {DAY_COLUMNS} FROM day WHERE day_id = ?1"),
                params![day_id],
                day_from_row,
            )
            .optional()?
            .ok_or_else(|| SimError::not_found("day", day_id))
    }

    pub fn days_for_simulation(&self, simulation_id: &str) -> SimResult<Vec<DayRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DAY_COLUMNS} FROM day WHERE simulation_id = ?1 ORDER BY day_number ASC"
        ))?;
        let rows = stmt.query_map(params![simulation_id], day_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_day_status(
        &self,
        day_id: &str,
        status: DayStatus,
        error: Option<&str>,
    ) -> SimResult<()> {
        let now = now_timestamp();
        let changed = if status == DayStatus::Running {
            self.conn().execute(
                "UPDATE day SET status = 'running', started_at = ?2, finished_at = NULL, error = NULL
                 WHERE day_id = ?1",
                params![day_id, now],
            )?
        } else {
            self.conn().execute(
                "UPDATE day SET status = ?2, finished_at = ?3, error = ?4 WHERE day_id = ?1",
                params![day_id, status.as_str(), now, error],
            )?
        };
        if changed == 0 {
            return Err(SimError::not_found("day", day_id));
        }
        Ok(())
    }

    // ── Tick ───────────────────────────────────────────────────

    /// Insert unless a tick with the same (simulation, day, hour) exists.
    pub fn insert_tick_if_absent(&self, tick: &TickRecord) -> SimResult<InsertOutcome> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO tick (
                tick_id, simulation_id, day_id, day_number, hour, snapshot_json, status, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tick.tick_id,
                tick.simulation_id,
                tick.day_id,
                tick.day_number,
                tick.hour,
                serde_json::to_string(&tick.snapshot)?,
                tick.status.as_str(),
                now_timestamp(),
            ],
        )?;
        Ok(insert_outcome(changed))
    }

    pub fn tick_by_hour(
        &self,
        simulation_id: &str,
        day_number: DayNumber,
        hour: Hour,
    ) -> SimResult<Option<TickRecord>> {
        let tick = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TICK_COLUMNS} FROM tick
                     WHERE simulation_id = ?1 AND day_number = ?2 AND hour = ?3"
                ),
                params![simulation_id, day_number, hour],
                tick_from_row,
            )
            .optional()?;
        Ok(tick)
    }

    pub fn get_tick(&self, tick_id: &str) -> SimResult<TickRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {TICK_COLUMNS} FROM tick WHERE tick_id = ?1"),
                params![tick_id],
                tick_from_row,
            )
            .optional()?
            .ok_or_else(|| SimError::not_found("tick", tick_id))
    }

    pub fn update_tick_status(
        &self,
        tick_id: &str,
        status: TickStatus,
        error: Option<&str>,
    ) -> SimResult<()> {
        let now = now_timestamp();
        let changed = if status == TickStatus::Running {
            self.conn().execute(
                "UPDATE tick SET status = 'running', started_at = ?2, finished_at = NULL, error = NULL
                 WHERE tick_id = ?1",
                params![tick_id, now],
            )?
        } else {
            self.conn().execute(
                "UPDATE tick SET status = ?2, finished_at = ?3, error = ?4 WHERE tick_id = ?1",
                params![tick_id, status.as_str(), now, error],
            )?
        };
        if changed == 0 {
            return Err(SimError::not_found("tick", tick_id));
        }
        Ok(())
    }
}
