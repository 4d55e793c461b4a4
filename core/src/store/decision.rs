//! Agent decision rows.

use super::{insert_outcome, SimStore};
use crate::{
    decision::DecisionRecord,
    error::SimResult,
    types::{now_timestamp, DayNumber, Hour, InsertOutcome},
};
use rusqlite::{params, OptionalExtension, Row};

const DECISION_COLUMNS: &str = "d.decision_id, d.simulation_id, d.agent_id, d.tick_id, d.day_number,
                                d.hour, d.price, d.quality, d.marketing, d.reasoning";

fn decision_from_row(r: &Row<'_>) -> rusqlite::Result<DecisionRecord> {
    Ok(DecisionRecord {
        decision_id: r.get(0)?,
        simulation_id: r.get(1)?,
        agent_id: r.get(2)?,
        tick_id: r.get(3)?,
        day_number: r.get(4)?,
        hour: r.get(5)?,
        price: r.get(6)?,
        quality: r.get(7)?,
        marketing: r.get(8)?,
        reasoning: r.get(9)?,
    })
}

impl SimStore {
    /// One decision per (simulation, agent, tick). A second writer is ignored.
    pub fn insert_decision_if_absent(&self, d: &DecisionRecord) -> SimResult<InsertOutcome> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO agent_decision (
                decision_id, simulation_id, agent_id, tick_id, day_number, hour,
                price, quality, marketing, reasoning, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                d.decision_id,
                d.simulation_id,
                d.agent_id,
                d.tick_id,
                d.day_number,
                d.hour,
                d.price,
                d.quality,
                d.marketing,
                d.reasoning,
                now_timestamp(),
            ],
        )?;
        Ok(insert_outcome(changed))
    }

    pub fn decision_for_tick(
        &self,
        simulation_id: &str,
        agent_id: &str,
        tick_id: &str,
    ) -> SimResult<Option<DecisionRecord>> {
        let decision = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {DECISION_COLUMNS} FROM agent_decision d
                     WHERE d.simulation_id = ?1 AND d.agent_id = ?2 AND d.tick_id = ?3"
                ),
                params![simulation_id, agent_id, tick_id],
                decision_from_row,
            )
            .optional()?;
        Ok(decision)
    }

    /// All decisions of one tick, in roster order.
    pub fn decisions_for_tick(&self, tick_id: &str) -> SimResult<Vec<DecisionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DECISION_COLUMNS} FROM agent_decision d
             JOIN agent a ON a.agent_id = d.agent_id
             WHERE d.tick_id = ?1
             ORDER BY a.position ASC, a.agent_id ASC"
        ))?;
        let rows = stmt.query_map(params![tick_id], decision_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All decisions made at (day, hour), in roster order.
    pub fn decisions_at(
        &self,
        simulation_id: &str,
        day_number: DayNumber,
        hour: Hour,
    ) -> SimResult<Vec<DecisionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DECISION_COLUMNS} FROM agent_decision d
             JOIN agent a ON a.agent_id = d.agent_id
             WHERE d.simulation_id = ?1 AND d.day_number = ?2 AND d.hour = ?3
             ORDER BY a.position ASC, a.agent_id ASC"
        ))?;
        let rows = stmt.query_map(params![simulation_id, day_number, hour], decision_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The agent's most recent decision strictly before (day, hour).
    pub fn latest_decision_before(
        &self,
        simulation_id: &str,
        agent_id: &str,
        day_number: DayNumber,
        hour: Hour,
    ) -> SimResult<Option<DecisionRecord>> {
        let decision = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {DECISION_COLUMNS} FROM agent_decision d
                     WHERE d.simulation_id = ?1 AND d.agent_id = ?2
                       AND (d.day_number < ?3 OR (d.day_number = ?3 AND d.hour < ?4))
                     ORDER BY d.day_number DESC, d.hour DESC
                     LIMIT 1"
                ),
                params![simulation_id, agent_id, day_number, hour],
                decision_from_row,
            )
            .optional()?;
        Ok(decision)
    }

    pub fn decision_count(&self, simulation_id: &str) -> SimResult<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM agent_decision WHERE simulation_id = ?1",
            params![simulation_id],
            |r| r.get(0),
        )?)
    }
}
