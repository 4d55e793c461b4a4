//! Customer event (market outcome) rows.

use super::{insert_outcome, json_column, SimStore};
use crate::{
    demand::CustomerEvent,
    error::SimResult,
    types::{now_timestamp, DayNumber, Hour, InsertOutcome},
};
use rusqlite::{params, OptionalExtension, Row};

const EVENT_COLUMNS: &str = "e.event_id, e.simulation_id, e.agent_id, e.tick_id, e.day_number, e.hour,
                             e.customers, e.sales_volume, e.revenue, e.factors_json";

fn event_from_row(r: &Row<'_>) -> rusqlite::Result<CustomerEvent> {
    Ok(CustomerEvent {
        event_id: r.get(0)?,
        simulation_id: r.get(1)?,
        agent_id: r.get(2)?,
        tick_id: r.get(3)?,
        day_number: r.get(4)?,
        hour: r.get(5)?,
        customers: r.get(6)?,
        sales_volume: r.get(7)?,
        revenue: r.get(8)?,
        factors: json_column(r, 9)?,
    })
}

impl SimStore {
    /// Keyed by (simulation, agent, day, hour). A second writer is ignored.
    pub fn insert_customer_event_if_absent(&self, e: &CustomerEvent) -> SimResult<InsertOutcome> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO customer_event (
                event_id, simulation_id, agent_id, tick_id, day_number, hour,
                customers, sales_volume, revenue, factors_json, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                e.event_id,
                e.simulation_id,
                e.agent_id,
                e.tick_id,
                e.day_number,
                e.hour,
                e.customers,
                e.sales_volume,
                e.revenue,
                serde_json::to_string(&e.factors)?,
                now_timestamp(),
            ],
        )?;
        Ok(insert_outcome(changed))
    }

    pub fn customer_event_for(
        &self,
        simulation_id: &str,
        agent_id: &str,
        day_number: DayNumber,
        hour: Hour,
    ) -> SimResult<Option<CustomerEvent>> {
        let event = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM customer_event e
                     WHERE e.simulation_id = ?1 AND e.agent_id = ?2
                       AND e.day_number = ?3 AND e.hour = ?4"
                ),
                params![simulation_id, agent_id, day_number, hour],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    /// All outcomes at (day, hour), in roster order.
    pub fn customer_events_at(
        &self,
        simulation_id: &str,
        day_number: DayNumber,
        hour: Hour,
    ) -> SimResult<Vec<CustomerEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM customer_event e
             JOIN agent a ON a.agent_id = e.agent_id
             WHERE e.simulation_id = ?1 AND e.day_number = ?2 AND e.hour = ?3
             ORDER BY a.position ASC, a.agent_id ASC"
        ))?;
        let rows = stmt.query_map(params![simulation_id, day_number, hour], event_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn customer_events_for_tick(&self, tick_id: &str) -> SimResult<Vec<CustomerEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM customer_event e
             JOIN agent a ON a.agent_id = e.agent_id
             WHERE e.tick_id = ?1
             ORDER BY a.position ASC, a.agent_id ASC"
        ))?;
        let rows = stmt.query_map(params![tick_id], event_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
