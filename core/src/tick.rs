//! Tick orchestration: all agents for one business hour.
//!
//! STATE MACHINE: pending → running → {completed, partial, failed}
//!
//! EXECUTION ORDER (fixed):
//!   1. Ensure day and tick rows, mark the tick running
//!   2. Load the roster (stable order)
//!   3. Run agent turns, parallel or sequential
//!   4. Settle the market over every agent holding a decision; a tick
//!      already settled over other agents keeps its rows and is partial
//!   5. Derive status, write the tick artifact, update the tick row
//!
//! Visibility:
//!   - Parallel: everyone sees only the previous tick's decisions.
//!   - Sequential: agents act in roster order; each sees the current
//!     decisions of those who already acted and the previous decisions
//!     of those who have not.

use crate::{
    agent_turn::{AgentTurnInput, AgentTurnResult},
    artifact::{persist_artifact, ArtifactRecord, TickAgentRef, TickArtifact, TICK_ARTIFACT_VERSION},
    clock,
    decision::{Decision, DecisionRecord},
    demand::{settle_market, CustomerEvent, MarketSummary},
    engine::{derive_day_seed, Agent, SimEngine, Simulation},
    error::SimResult,
    prompt::{CompetitorView, MarketShareView, OutcomeView, PromptContext},
    timeline::{self, DayRecord, TickRecord},
    types::{AgentId, ArtifactId, DayId, DayNumber, Hour, TickId, TickStatus},
};
use std::collections::HashMap;
use std::time::Instant;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default)]
pub struct TickOptions {
    /// Seed for a day that does not exist yet. Ignored once the day exists.
    pub day_seed:   Option<u64>,
    /// Pre-fetched roster. Loaded from the store when absent.
    pub agents:     Option<Vec<Agent>>,
    /// Overrides the simulation's configured visibility mode.
    pub sequential: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct TickResult {
    pub simulation_id:   String,
    pub day_number:      DayNumber,
    pub hour:            Hour,
    pub day_id:          Option<DayId>,
    pub tick_id:         Option<TickId>,
    pub status:          TickStatus,
    pub sequential:      bool,
    pub agents:          Vec<AgentTurnResult>,
    pub market:          Option<MarketSummary>,
    pub customer_events: Vec<CustomerEvent>,
    pub artifact_id:     Option<ArtifactId>,
    pub error:           Option<String>,
    pub duration_ms:     u64,
}

impl TickResult {
    fn failed(simulation_id: &str, day_number: DayNumber, hour: Hour, error: String, started: Instant) -> Self {
        Self {
            simulation_id: simulation_id.to_string(),
            day_number,
            hour,
            day_id: None,
            tick_id: None,
            status: TickStatus::Failed,
            sequential: false,
            agents: Vec::new(),
            market: None,
            customer_events: Vec::new(),
            artifact_id: None,
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn success_count(&self) -> u32 {
        self.agents.iter().filter(|a| a.success).count() as u32
    }

    pub fn fallback_count(&self) -> u32 {
        self.agents.iter().filter(|a| a.used_fallback).count() as u32
    }

    /// Agents without a usable generated decision, fallbacks included.
    pub fn failure_count(&self) -> u32 {
        self.agents.len() as u32 - self.success_count()
    }
}

/// Step status from agent outcomes.
///
/// No successes → failed. All succeeded and every artifact intact →
/// completed. Anything else → partial. A fallback counts as a failure.
pub fn tick_status(agents: &[AgentTurnResult]) -> TickStatus {
    let successes = agents.iter().filter(|a| a.success).count();
    let integrity_issues = agents.iter().filter(|a| a.integrity_error.is_some()).count();
    if successes == 0 {
        TickStatus::Failed
    } else if successes == agents.len() && integrity_issues == 0 {
        TickStatus::Completed
    } else {
        TickStatus::Partial
    }
}

/// The previous tick as seen by every agent of the current one.
#[derive(Default)]
struct PriorStep {
    decisions: HashMap<AgentId, DecisionRecord>,
    market:    Vec<MarketShareView>,
    outcomes:  HashMap<AgentId, OutcomeView>,
}

impl SimEngine {
    /// Run one tick. Never returns an error: failures are in the result.
    pub async fn run_tick(
        &self,
        simulation_id: &str,
        day_number: DayNumber,
        hour: Hour,
        options: TickOptions,
    ) -> TickResult {
        let started = Instant::now();
        if !clock::is_business_hour(hour) {
            return TickResult::failed(
                simulation_id,
                day_number,
                hour,
                format!("hour {hour} is outside business hours"),
                started,
            );
        }
        let simulation = match self.store.get_simulation(simulation_id) {
            Ok(s) => s,
            Err(e) => return TickResult::failed(simulation_id, day_number, hour, e.to_string(), started),
        };
        let seed = options
            .day_seed
            .unwrap_or_else(|| derive_day_seed(&simulation, day_number));
        let day = match timeline::ensure_day(
            &self.store,
            simulation_id,
            day_number,
            seed,
            simulation.config.environment.as_ref(),
        ) {
            Ok(d) => d,
            Err(e) => {
                return TickResult::failed(
                    simulation_id,
                    day_number,
                    hour,
                    format!("day bootstrap failed: {e}"),
                    started,
                )
            }
        };
        let sequential = options.sequential.unwrap_or(simulation.config.sequential);
        self.execute_tick(&simulation, &day, hour, options.agents, sequential).await
    }

    /// Run one tick of an already-bootstrapped day.
    pub(crate) async fn execute_tick(
        &self,
        simulation: &Simulation,
        day: &DayRecord,
        hour: Hour,
        agents: Option<Vec<Agent>>,
        sequential: bool,
    ) -> TickResult {
        let started = Instant::now();
        let sim_id = simulation.simulation_id.as_str();
        let mut result = TickResult {
            day_id: Some(day.day_id.clone()),
            sequential,
            ..TickResult::failed(sim_id, day.day_number, hour, String::new(), started)
        };
        result.error = None;

        // 1. Tick row.
        let tick = match timeline::ensure_tick(
            &self.store,
            day,
            hour,
            simulation.config.tick_snapshots.get(&hour),
        ) {
            Ok(t) => t,
            Err(e) => {
                result.error = Some(format!("tick bootstrap failed: {e}"));
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };
        result.tick_id = Some(tick.tick_id.clone());
        if let Err(e) = timeline::update_tick_status(&self.store, &tick.tick_id, TickStatus::Running, None) {
            log::warn!("day={} hour={hour} tick: could not mark running: {e}", day.day_number);
        }

        // 2. Roster.
        let agents = match agents.map(Ok).unwrap_or_else(|| self.store.list_agents(sim_id)) {
            Ok(a) => a,
            Err(e) => return self.finish_failed(result, &tick, format!("agent fetch failed: {e}"), started),
        };
        if agents.is_empty() {
            return self.finish_failed(result, &tick, "no agents registered".into(), started);
        }

        // 3. Turns.
        let prior = match self.prior_step(sim_id, day.day_number, hour) {
            Ok(p) => p,
            Err(e) => {
                log::warn!(
                    "day={} hour={hour} tick: previous step unavailable, agents see no history: {e}",
                    day.day_number
                );
                PriorStep::default()
            }
        };
        log::debug!(
            "day={} hour={hour} tick: running {} agents ({})",
            day.day_number,
            agents.len(),
            if sequential { "sequential" } else { "parallel" }
        );
        result.agents = if sequential {
            self.run_sequential(simulation, day, &tick, &agents, &prior).await
        } else {
            self.run_parallel(simulation, day, &tick, &agents, &prior).await
        };

        // 4. Market.
        let decisions: Vec<DecisionRecord> = result
            .agents
            .iter()
            .filter(|a| a.has_decision())
            .filter_map(|a| decision_record(&tick, a))
            .collect();
        let mut errors: Vec<String> = Vec::new();
        let mut unsettled = false;
        if decisions.is_empty() {
            log::warn!("day={} hour={hour} tick: no decisions to settle", day.day_number);
        } else {
            let settlement = settle_market(&self.store, day, &tick, &decisions);
            if let Some(e) = settlement.error {
                errors.push(format!("demand: {e}"));
            }
            unsettled = !settlement.unsettled.is_empty();
            result.market = settlement.summary;
            result.customer_events = settlement.events;
        }

        // 5. Status, artifact, row.
        result.status = tick_status(&result.agents);
        if unsettled && result.status == TickStatus::Completed {
            result.status = TickStatus::Partial;
        }
        for a in &result.agents {
            if !a.success {
                if let Some(e) = &a.error {
                    errors.push(format!("{}: {e}", a.model_id));
                } else if a.used_fallback {
                    errors.push(format!("{}: used fallback decision", a.model_id));
                }
            }
            if let Some(e) = &a.integrity_error {
                errors.push(format!("{}: {e}", a.model_id));
            }
        }
        if result.status == TickStatus::Failed && errors.is_empty() {
            errors.push("no agent produced a decision".into());
        }
        result.error = (!errors.is_empty()).then(|| errors.join("; "));
        result.duration_ms = started.elapsed().as_millis() as u64;

        result.artifact_id = self.persist_tick_artifact(sim_id, day, &tick, &result);
        if let Err(e) = timeline::update_tick_status(
            &self.store,
            &tick.tick_id,
            result.status,
            result.error.as_deref(),
        ) {
            log::warn!("day={} hour={hour} tick: status update failed: {e}", day.day_number);
        }
        log::info!(
            "day={} hour={hour} tick: {} ({} ok, {} fallback, {} customers)",
            day.day_number,
            result.status,
            result.success_count(),
            result.fallback_count(),
            result.market.as_ref().map_or(0, |m| m.total_customers)
        );
        result
    }

    fn finish_failed(&self, mut result: TickResult, tick: &TickRecord, error: String, started: Instant) -> TickResult {
        log::warn!("day={} hour={} tick: failed: {error}", tick.day_number, tick.hour);
        result.status = TickStatus::Failed;
        if let Err(e) = timeline::update_tick_status(&self.store, &tick.tick_id, TickStatus::Failed, Some(&error)) {
            log::warn!("day={} hour={} tick: status update failed: {e}", tick.day_number, tick.hour);
        }
        result.error = Some(error);
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn prior_step(&self, simulation_id: &str, day_number: DayNumber, hour: Hour) -> SimResult<PriorStep> {
        let Some((prev_day, prev_hour)) = clock::previous_tick(day_number, hour) else {
            return Ok(PriorStep::default());
        };
        let decisions = self.store.decisions_at(simulation_id, prev_day, prev_hour)?;
        let events = self.store.customer_events_at(simulation_id, prev_day, prev_hour)?;
        let roster: HashMap<AgentId, String> = self
            .store
            .list_agents(simulation_id)?
            .into_iter()
            .map(|a| (a.agent_id, a.model_id))
            .collect();

        let total: u32 = events.iter().map(|e| e.customers).sum();
        let market = events
            .iter()
            .map(|e| MarketShareView {
                agent_id: e.agent_id.clone(),
                model_id: roster.get(&e.agent_id).cloned().unwrap_or_default(),
                customers: e.customers,
                revenue: e.revenue,
                market_share: if total == 0 { 0.0 } else { e.customers as f64 / total as f64 },
            })
            .collect();
        let outcomes = events
            .iter()
            .map(|e| {
                (
                    e.agent_id.clone(),
                    OutcomeView {
                        customers: e.customers,
                        revenue: e.revenue,
                    },
                )
            })
            .collect();
        Ok(PriorStep {
            decisions: decisions.into_iter().map(|d| (d.agent_id.clone(), d)).collect(),
            market,
            outcomes,
        })
    }

    /// Build one agent's turn input. `current` holds decisions already
    /// made this tick (sequential mode only).
    fn turn_input(
        &self,
        simulation: &Simulation,
        day: &DayRecord,
        tick: &TickRecord,
        agent: &Agent,
        roster: &[Agent],
        prior: &PriorStep,
        current: &HashMap<AgentId, Decision>,
    ) -> AgentTurnInput {
        let previous_decision = match self.store.latest_decision_before(
            &simulation.simulation_id,
            &agent.agent_id,
            day.day_number,
            tick.hour,
        ) {
            Ok(d) => d.map(|d| d.decision()),
            Err(e) => {
                log::warn!(
                    "day={} hour={} tick: {} history unavailable: {e}",
                    day.day_number,
                    tick.hour,
                    agent.model_id
                );
                None
            }
        };

        let competitors = roster
            .iter()
            .filter(|other| other.agent_id != agent.agent_id)
            .filter_map(|other| {
                if let Some(d) = current.get(&other.agent_id) {
                    return Some(competitor_view(other, d.price, d.quality, d.marketing, true));
                }
                prior
                    .decisions
                    .get(&other.agent_id)
                    .map(|d| competitor_view(other, d.price, d.quality, d.marketing, false))
            })
            .collect();

        AgentTurnInput {
            simulation_id: simulation.simulation_id.clone(),
            agent_id: agent.agent_id.clone(),
            model_id: agent.model_id.clone(),
            day_id: day.day_id.clone(),
            tick_id: tick.tick_id.clone(),
            day_number: day.day_number,
            hour: tick.hour,
            context: PromptContext {
                simulation_id: simulation.simulation_id.clone(),
                agent_id: agent.agent_id.clone(),
                model_id: agent.model_id.clone(),
                strategy_hints: agent.strategy_hints.clone(),
                day_number: day.day_number,
                hour: tick.hour,
                environment: day.environment.clone(),
                tick: tick.snapshot.clone(),
                previous_decision: previous_decision.clone(),
                previous_outcome: prior.outcomes.get(&agent.agent_id).cloned(),
                competitors,
                last_market: prior.market.clone(),
            },
            previous_decision,
        }
    }

    /// An already-persisted decision short-circuits the generator.
    fn existing_turn(&self, tick: &TickRecord, agent: &Agent, day_id: &str) -> Option<AgentTurnResult> {
        match self
            .store
            .decision_for_tick(&tick.simulation_id, &agent.agent_id, &tick.tick_id)
        {
            Ok(Some(existing)) => Some(self.reconcile_existing_turn(&existing, &agent.model_id, day_id)),
            Ok(None) => None,
            Err(e) => {
                log::warn!(
                    "day={} hour={} tick: {} existing-decision check failed: {e}",
                    tick.day_number,
                    tick.hour,
                    agent.model_id
                );
                None
            }
        }
    }

    async fn run_parallel(
        &self,
        simulation: &Simulation,
        day: &DayRecord,
        tick: &TickRecord,
        agents: &[Agent],
        prior: &PriorStep,
    ) -> Vec<AgentTurnResult> {
        let mut slots: Vec<Option<AgentTurnResult>> = vec![None; agents.len()];
        let mut tasks = JoinSet::new();
        let no_current = HashMap::new();

        for (idx, agent) in agents.iter().enumerate() {
            if let Some(done) = self.existing_turn(tick, agent, &day.day_id) {
                slots[idx] = Some(done);
                continue;
            }
            let input = self.turn_input(simulation, day, tick, agent, agents, prior, &no_current);
            let engine = self.clone();
            tasks.spawn(async move { (idx, engine.run_agent_turn(input).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, turn)) => slots[idx] = Some(turn),
                Err(e) => log::error!(
                    "day={} hour={} tick: agent turn task aborted: {e}",
                    day.day_number,
                    tick.hour
                ),
            }
        }

        agents
            .iter()
            .zip(slots)
            .map(|(agent, slot)| {
                slot.unwrap_or_else(|| {
                    AgentTurnResult::aborted(&agent.agent_id, &agent.model_id, "agent turn task aborted")
                })
            })
            .collect()
    }

    async fn run_sequential(
        &self,
        simulation: &Simulation,
        day: &DayRecord,
        tick: &TickRecord,
        agents: &[Agent],
        prior: &PriorStep,
    ) -> Vec<AgentTurnResult> {
        let mut current: HashMap<AgentId, Decision> = HashMap::new();
        let mut results = Vec::with_capacity(agents.len());

        for agent in agents {
            let turn = match self.existing_turn(tick, agent, &day.day_id) {
                Some(done) => done,
                None => {
                    let input = self.turn_input(simulation, day, tick, agent, agents, prior, &current);
                    self.run_agent_turn(input).await
                }
            };
            if let Some(d) = &turn.decision {
                current.insert(agent.agent_id.clone(), d.clone());
            }
            results.push(turn);
        }
        results
    }

    fn persist_tick_artifact(
        &self,
        simulation_id: &str,
        day: &DayRecord,
        tick: &TickRecord,
        result: &TickResult,
    ) -> Option<ArtifactId> {
        let payload = TickArtifact {
            version: TICK_ARTIFACT_VERSION,
            day_number: tick.day_number,
            hour: tick.hour,
            status: result.status,
            sequential: result.sequential,
            agents: result
                .agents
                .iter()
                .map(|a| TickAgentRef {
                    agent_id: a.agent_id.clone(),
                    model_id: a.model_id.clone(),
                    artifact_id: a.artifact_id.clone(),
                    success: a.success,
                    used_fallback: a.used_fallback,
                    error: a.error.clone().or_else(|| a.integrity_error.clone()),
                })
                .collect(),
            market: result.market.clone(),
            error: result.error.clone(),
            duration_ms: result.duration_ms,
        };
        let record = ArtifactRecord::tick(simulation_id, &day.day_id, &tick.tick_id, payload);
        match persist_artifact(&self.store, &record) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!(
                    "day={} hour={} tick: artifact not persisted: {e}",
                    tick.day_number,
                    tick.hour
                );
                None
            }
        }
    }
}

fn competitor_view(agent: &Agent, price: f64, quality: u32, marketing: u32, current_step: bool) -> CompetitorView {
    CompetitorView {
        agent_id: agent.agent_id.clone(),
        model_id: agent.model_id.clone(),
        price,
        quality,
        marketing,
        current_step,
    }
}

/// Rebuild the persisted decision row from a settled turn.
fn decision_record(tick: &TickRecord, turn: &AgentTurnResult) -> Option<DecisionRecord> {
    let d = turn.decision.as_ref()?;
    Some(DecisionRecord {
        decision_id: turn.decision_id.clone()?,
        simulation_id: tick.simulation_id.clone(),
        agent_id: turn.agent_id.clone(),
        tick_id: tick.tick_id.clone(),
        day_number: tick.day_number,
        hour: tick.hour,
        price: d.price,
        quality: d.quality,
        marketing: d.marketing,
        reasoning: d.reasoning.clone(),
    })
}
