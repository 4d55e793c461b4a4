//! Provenance artifact rows. Insert-once-or-look-up; never updated.

use super::{insert_outcome, json_column, SimStore};
use crate::{
    artifact::{ArtifactKind, ArtifactRecord},
    error::{SimError, SimResult},
    types::{ArtifactId, InsertOutcome},
};
use rusqlite::{params, OptionalExtension, Row};

const ARTIFACT_COLUMNS: &str = "artifact_id, simulation_id, kind, day_id, tick_id, agent_id,
                                payload_json, redacted, prompt_hash, schema_hash, created_at";

fn artifact_from_row(r: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    let kind: String = r.get(2)?;
    Ok(ArtifactRecord {
        artifact_id: r.get(0)?,
        simulation_id: r.get(1)?,
        kind: ArtifactKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown artifact kind: {kind}").into(),
            )
        })?,
        day_id: r.get(3)?,
        tick_id: r.get(4)?,
        agent_id: r.get(5)?,
        payload: json_column(r, 6)?,
        redacted: r.get::<_, i32>(7)? != 0,
        prompt_hash: r.get(8)?,
        schema_hash: r.get(9)?,
        created_at: r.get(10)?,
    })
}

impl SimStore {
    /// Insert unless an artifact with the same natural key exists:
    /// (tick, agent) for agent turns, tick for ticks, day for days,
    /// simulation for run summaries.
    pub fn insert_artifact_if_absent(&self, a: &ArtifactRecord) -> SimResult<InsertOutcome> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO artifact (
                artifact_id, simulation_id, kind, day_id, tick_id, agent_id, version,
                payload_json, redacted, prompt_hash, schema_hash, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                a.artifact_id,
                a.simulation_id,
                a.kind.as_str(),
                a.day_id,
                a.tick_id,
                a.agent_id,
                a.payload.version(),
                serde_json::to_string(&a.payload)?,
                if a.redacted { 1 } else { 0 },
                a.prompt_hash,
                a.schema_hash,
                a.created_at,
            ],
        )?;
        Ok(insert_outcome(changed))
    }

    /// Look up the id of the artifact occupying `a`'s natural key.
    pub fn existing_artifact_id(&self, a: &ArtifactRecord) -> SimResult<Option<ArtifactId>> {
        match a.kind {
            ArtifactKind::AgentTurn => match (&a.tick_id, &a.agent_id) {
                (Some(tick_id), Some(agent_id)) => self.agent_turn_artifact_id(tick_id, agent_id),
                _ => Ok(None),
            },
            ArtifactKind::Tick => match &a.tick_id {
                Some(tick_id) => self.artifact_id_where("kind = 'tick' AND tick_id = ?1", tick_id),
                None => Ok(None),
            },
            ArtifactKind::Day => match &a.day_id {
                Some(day_id) => self.artifact_id_where("kind = 'day' AND day_id = ?1", day_id),
                None => Ok(None),
            },
            ArtifactKind::RunSummary => self.artifact_id_where(
                "kind = 'run_summary' AND simulation_id = ?1",
                &a.simulation_id,
            ),
        }
    }

    pub fn agent_turn_artifact_id(
        &self,
        tick_id: &str,
        agent_id: &str,
    ) -> SimResult<Option<ArtifactId>> {
        let id = self
            .conn()
            .query_row(
                "SELECT artifact_id FROM artifact
                 WHERE kind = 'agent_turn' AND tick_id = ?1 AND agent_id = ?2",
                params![tick_id, agent_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn artifact_id_where(&self, clause: &str, key: &str) -> SimResult<Option<ArtifactId>> {
        let id = self
            .conn()
            .query_row(
                &format!("SELECT artifact_id FROM artifact WHERE {clause}"),
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_artifact(&self, artifact_id: &str) -> SimResult<ArtifactRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {ARTIFACT_COLUMNS} FROM artifact WHERE artifact_id = ?1"),
                params![artifact_id],
                artifact_from_row,
            )
            .optional()?
            .ok_or_else(|| SimError::not_found("artifact", artifact_id))
    }

    /// Every artifact linked to a tick (agent turns and the tick summary).
    pub fn artifacts_for_tick(&self, tick_id: &str) -> SimResult<Vec<ArtifactRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifact WHERE tick_id = ?1
             ORDER BY kind ASC, created_at ASC, artifact_id ASC"
        ))?;
        let rows = stmt.query_map(params![tick_id], artifact_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn artifact_count(&self, simulation_id: &str, kind: ArtifactKind) -> SimResult<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM artifact WHERE simulation_id = ?1 AND kind = ?2",
            params![simulation_id, kind.as_str()],
            |r| r.get(0),
        )?)
    }
}
