//! Append-only metric rows for day- and agent-level reporting.

use super::{json_column, SimStore};
use crate::{error::SimResult, types::now_timestamp};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub simulation_id: String,
    pub day_id:        Option<String>,
    pub agent_id:      Option<String>,
    pub name:          String,
    pub value:         f64,
    pub metadata:      serde_json::Value,
}

impl SimStore {
    pub fn append_metrics(&self, rows: &[MetricRow]) -> SimResult<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "INSERT INTO metric (simulation_id, day_id, agent_id, name, value, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let now = now_timestamp();
        for row in rows {
            stmt.execute(params![
                row.simulation_id,
                row.day_id,
                row.agent_id,
                row.name,
                row.value,
                serde_json::to_string(&row.metadata)?,
                now,
            ])?;
        }
        Ok(())
    }

    pub fn metrics_for_day(&self, day_id: &str) -> SimResult<Vec<MetricRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT simulation_id, day_id, agent_id, name, value, metadata_json
             FROM metric WHERE day_id = ?1
             ORDER BY metric_id ASC",
        )?;
        let rows = stmt.query_map(params![day_id], |r| {
            Ok(MetricRow {
                simulation_id: r.get(0)?,
                day_id: r.get(1)?,
                agent_id: r.get(2)?,
                name: r.get(3)?,
                value: r.get(4)?,
                metadata: json_column(r, 5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
