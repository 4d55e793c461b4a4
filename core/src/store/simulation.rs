//! Simulation, roster and run-gate queries.

use super::SimStore;
use crate::{
    config::SimulationConfig,
    engine::{Agent, Simulation},
    error::{SimError, SimResult},
    types::{now_timestamp, SimulationStatus},
};
use rusqlite::{params, OptionalExtension};

impl SimStore {
    pub fn insert_simulation(
        &self,
        simulation_id: &str,
        name: &str,
        config: &SimulationConfig,
    ) -> SimResult<()> {
        let now = now_timestamp();
        self.conn().execute(
            "INSERT INTO simulation (simulation_id, name, config_json, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
            params![simulation_id, name, serde_json::to_string(config)?, now],
        )?;
        Ok(())
    }

    pub fn get_simulation(&self, simulation_id: &str) -> SimResult<Simulation> {
        let row = self
            .conn()
            .query_row(
                "SELECT simulation_id, name, config_json, status, created_at, updated_at
                 FROM simulation WHERE simulation_id = ?1",
                params![simulation_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let (simulation_id, name, config_json, status, created_at, updated_at) =
            row.ok_or_else(|| SimError::not_found("simulation", simulation_id))?;
        Ok(Simulation {
            simulation_id,
            name,
            config: serde_json::from_str(&config_json)?,
            status: SimulationStatus::parse(&status),
            created_at,
            updated_at,
        })
    }

    pub fn simulation_status(&self, simulation_id: &str) -> SimResult<SimulationStatus> {
        let status: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM simulation WHERE simulation_id = ?1",
                params![simulation_id],
                |r| r.get(0),
            )
            .optional()?;
        status
            .map(|s| SimulationStatus::parse(&s))
            .ok_or_else(|| SimError::not_found("simulation", simulation_id))
    }

    /// Atomically move the simulation from an idle status to `running`.
    /// Returns false when another run already holds the gate.
    pub fn try_acquire_run(&self, simulation_id: &str) -> SimResult<bool> {
        let changed = self.conn().execute(
            "UPDATE simulation SET status = 'running', updated_at = ?2
             WHERE simulation_id = ?1
               AND status IN ('pending', 'completed', 'partial', 'failed')",
            params![simulation_id, now_timestamp()],
        )?;
        if changed == 1 {
            return Ok(true);
        }
        // Distinguish "already running" from "no such simulation".
        self.simulation_status(simulation_id)?;
        Ok(false)
    }

    /// Release the run gate with a terminal status.
    pub fn release_run(&self, simulation_id: &str, status: SimulationStatus) -> SimResult<()> {
        debug_assert!(status != SimulationStatus::Running);
        self.conn().execute(
            "UPDATE simulation SET status = ?2, updated_at = ?3
             WHERE simulation_id = ?1 AND status = 'running'",
            params![simulation_id, status.as_str(), now_timestamp()],
        )?;
        Ok(())
    }

    // ── Agents ─────────────────────────────────────────────────

    pub fn insert_agent(&self, agent: &Agent) -> SimResult<()> {
        self.conn().execute(
            "INSERT INTO agent (agent_id, simulation_id, model_id, strategy_hints, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agent.agent_id,
                agent.simulation_id,
                agent.model_id,
                agent.strategy_hints,
                agent.position,
                now_timestamp(),
            ],
        )?;
        Ok(())
    }

    /// The roster in its stable iteration order.
    pub fn list_agents(&self, simulation_id: &str) -> SimResult<Vec<Agent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT agent_id, simulation_id, model_id, strategy_hints, position
             FROM agent WHERE simulation_id = ?1
             ORDER BY position ASC, agent_id ASC",
        )?;
        let rows = stmt.query_map(params![simulation_id], |r| {
            Ok(Agent {
                agent_id: r.get(0)?,
                simulation_id: r.get(1)?,
                model_id: r.get(2)?,
                strategy_hints: r.get(3)?,
                position: r.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
