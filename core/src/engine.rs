//! The simulation engine: wiring, lifecycle and the run gate.
//!
//! CALL GRAPH (fixed):
//!   run_simulation → run_day (× num_days, in order)
//!   run_day        → run_tick (× business hours, in order)
//!   run_tick       → run_agent_turn (× agents) → settle_market (once)
//!
//! RULES:
//!   - Only `run_day` and `run_simulation` take the run gate. A caller that
//!     loses the gate gets a refusal, never a second concurrent run.
//!   - Entry points return structured results. Failures are captured in
//!     them, never raised.
//!   - Process-level settings come from `EngineConfig`, passed in once.
//!   - All randomness derives from persisted day seeds.

use crate::{
    artifact::{persist_artifact, ArtifactRecord, RunDayRef, RunSummaryArtifact, RUN_SUMMARY_ARTIFACT_VERSION},
    config::{EngineConfig, SimulationConfig},
    day::{DayOptions, DayResult},
    error::{ErrorKind, SimError, SimResult},
    generator::DecisionGenerator,
    prompt::{sha256_hex, PromptBuilder, StandardPromptBuilder},
    store::SimStore,
    types::{
        new_id, AgentId, ArtifactId, DayNumber, DayStatus, SimulationId,
        SimulationStatus,
    },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Row from the `simulation` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub simulation_id: SimulationId,
    pub name:          String,
    pub config:        SimulationConfig,
    pub status:        SimulationStatus,
    pub created_at:    String,
    pub updated_at:    String,
}

/// Row from the `agent` table. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id:       AgentId,
    pub simulation_id:  SimulationId,
    pub model_id:       String,
    pub strategy_hints: Option<String>,
    /// Stable iteration order within the roster.
    pub position:       u32,
}

/// Cheap to clone: every field is shared. Parallel ticks hand one clone
/// to each agent task.
#[derive(Clone)]
pub struct SimEngine {
    pub(crate) store:     Arc<SimStore>,
    pub(crate) generator: Arc<dyn DecisionGenerator>,
    pub(crate) prompts:   Arc<dyn PromptBuilder>,
    pub(crate) config:    Arc<EngineConfig>,
}

impl SimEngine {
    pub fn new(
        store: Arc<SimStore>,
        generator: Arc<dyn DecisionGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            generator,
            prompts: Arc::new(StandardPromptBuilder),
            config: Arc::new(config),
        }
    }

    /// Replace the default prompt builder.
    pub fn with_prompt_builder(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn store(&self) -> &SimStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Validate `config` and persist a new pending simulation with its roster.
    pub fn create_simulation(&self, name: &str, config: SimulationConfig) -> SimResult<Simulation> {
        config.validate().map_err(SimError::InvalidConfig)?;

        let simulation_id = new_id();
        self.store.insert_simulation(&simulation_id, name, &config)?;
        for (position, spec) in config.agents.iter().enumerate() {
            self.store.insert_agent(&Agent {
                agent_id: new_id(),
                simulation_id: simulation_id.clone(),
                model_id: spec.model_id.clone(),
                strategy_hints: spec.strategy_hints.clone(),
                position: position as u32,
            })?;
        }
        log::info!(
            "simulation {simulation_id}: created '{name}' with {} agents, {} days",
            config.agents.len(),
            config.num_days
        );
        self.store.get_simulation(&simulation_id)
    }

    pub fn get_simulation(&self, simulation_id: &str) -> SimResult<Simulation> {
        self.store.get_simulation(simulation_id)
    }

    pub fn list_agents(&self, simulation_id: &str) -> SimResult<Vec<Agent>> {
        self.store.list_agents(simulation_id)
    }

    // ── Run gate ─────────────────────────────────────────────────────────────

    /// Take the run gate or fail with `AlreadyRunning`.
    pub(crate) fn acquire_run(&self, simulation_id: &str) -> SimResult<()> {
        if self.store.try_acquire_run(simulation_id)? {
            Ok(())
        } else {
            log::info!("simulation {simulation_id}: run refused, already running");
            Err(SimError::AlreadyRunning {
                simulation_id: simulation_id.to_string(),
            })
        }
    }

    /// Release the gate to a terminal status. Logged, never raised:
    /// the run's own result is what the caller needs.
    pub(crate) fn release_run(&self, simulation_id: &str, status: SimulationStatus) {
        if let Err(e) = self.store.release_run(simulation_id, status) {
            log::error!("simulation {simulation_id}: failed to release run gate as {status}: {e}");
        }
    }

    /// Terminal status implied by the persisted days: completed when every
    /// configured day completed, failed when every day that ran failed,
    /// partial otherwise.
    pub(crate) fn settled_status(&self, simulation: &Simulation) -> SimResult<SimulationStatus> {
        let days = self.store.days_for_simulation(&simulation.simulation_id)?;
        let completed = (1..=simulation.config.num_days).all(|n| {
            days.iter()
                .any(|d| d.day_number == n && d.status == DayStatus::Completed)
        });
        let ran: Vec<_> = days.iter().filter(|d| d.status.is_terminal()).collect();
        Ok(if completed {
            SimulationStatus::Completed
        } else if !ran.is_empty() && ran.iter().all(|d| d.status == DayStatus::Failed) {
            SimulationStatus::Failed
        } else {
            SimulationStatus::Partial
        })
    }

    // ── Full run ─────────────────────────────────────────────────────────────

    /// Run every configured day in order under the run gate.
    /// Days already completed are skipped, so a partial run can be resumed.
    pub async fn run_simulation(&self, simulation_id: &str, options: RunOptions) -> RunResult {
        let started = Instant::now();

        let simulation = match self.store.get_simulation(simulation_id) {
            Ok(s) => s,
            Err(e) => return RunResult::failed(simulation_id, RunStatus::Failed, e, started),
        };
        if let Err(e) = self.acquire_run(simulation_id) {
            let status = match e.kind() {
                ErrorKind::Conflict => RunStatus::Refused,
                _ => RunStatus::Failed,
            };
            return RunResult::failed(simulation_id, status, e, started);
        }

        let mut days = Vec::new();
        let mut refs = Vec::new();
        let mut skipped = Vec::new();
        for day_number in 1..=simulation.config.num_days {
            match self.store.day_by_number(simulation_id, day_number) {
                Ok(Some(existing)) if existing.status == DayStatus::Completed => {
                    log::info!("day={day_number} run: already completed, skipping");
                    skipped.push(day_number);
                    refs.push(RunDayRef {
                        day_number,
                        day_id: Some(existing.day_id),
                        status: existing.status,
                        artifact_id: None,
                        skipped: true,
                    });
                    continue;
                }
                Ok(_) => {}
                Err(e) => log::warn!("day={day_number} run: could not check prior status: {e}"),
            }

            let result = self
                .execute_day(
                    &simulation,
                    day_number,
                    DayOptions {
                        seed: None,
                        sequential: options.sequential,
                    },
                )
                .await;
            refs.push(RunDayRef {
                day_number,
                day_id: result.day_id.clone(),
                status: result.status,
                artifact_id: result.artifact_id.clone(),
                skipped: false,
            });
            days.push(result);
        }

        let status = match self.settled_status(&simulation) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("simulation {simulation_id}: could not settle status: {e}");
                SimulationStatus::Failed
            }
        };

        let total_customers: u64 = days
            .iter()
            .filter_map(|d| d.summary.as_ref())
            .map(|s| s.total_customers)
            .sum();
        let total_revenue: f64 = days
            .iter()
            .filter_map(|d| d.summary.as_ref())
            .map(|s| s.total_revenue)
            .sum();
        let duration_ms = started.elapsed().as_millis() as u64;

        let artifact = ArtifactRecord::run_summary(
            simulation_id,
            RunSummaryArtifact {
                version: RUN_SUMMARY_ARTIFACT_VERSION,
                status,
                days: refs,
                total_customers,
                total_revenue,
                duration_ms,
            },
        );
        let artifact_id = match persist_artifact(&self.store, &artifact) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("simulation {simulation_id}: run summary artifact not persisted: {e}");
                None
            }
        };

        self.release_run(simulation_id, status);
        log::info!(
            "simulation {simulation_id}: run {status} ({} days run, {} skipped) in {duration_ms}ms",
            days.len(),
            skipped.len()
        );

        RunResult {
            simulation_id: simulation_id.to_string(),
            status: RunStatus::from(status),
            days,
            skipped_days: skipped,
            artifact_id,
            total_customers,
            total_revenue,
            error: None,
            duration_ms,
        }
    }
}

/// Day seed used when the caller does not supply one: mixed from the
/// configured base seed (or a digest of the simulation id) and the day number.
pub fn derive_day_seed(simulation: &Simulation, day_number: DayNumber) -> u64 {
    let base = simulation.config.seed.unwrap_or_else(|| {
        let digest = sha256_hex(simulation.simulation_id.as_bytes());
        u64::from_str_radix(&digest[..16], 16).unwrap_or(0)
    });
    splitmix64(base.wrapping_add(day_number as u64))
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the simulation's configured visibility mode.
    pub sequential: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
    /// The run gate was held by another run.
    Refused,
}

impl From<SimulationStatus> for RunStatus {
    fn from(status: SimulationStatus) -> Self {
        match status {
            SimulationStatus::Completed => Self::Completed,
            SimulationStatus::Failed => Self::Failed,
            _ => Self::Partial,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub simulation_id:   SimulationId,
    pub status:          RunStatus,
    pub days:            Vec<DayResult>,
    pub skipped_days:    Vec<DayNumber>,
    pub artifact_id:     Option<ArtifactId>,
    pub total_customers: u64,
    pub total_revenue:   f64,
    pub error:           Option<String>,
    pub duration_ms:     u64,
}

impl RunResult {
    fn failed(simulation_id: &str, status: RunStatus, error: SimError, started: Instant) -> Self {
        Self {
            simulation_id: simulation_id.to_string(),
            status,
            days: Vec::new(),
            skipped_days: Vec::new(),
            artifact_id: None,
            total_customers: 0,
            total_revenue: 0.0,
            error: Some(error.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
