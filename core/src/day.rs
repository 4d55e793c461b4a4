//! Day orchestration: every business hour of one day, in order.
//!
//! Ticks never run concurrently within a day: each hour's competitor
//! view reads the previous hour's persisted decisions and outcomes.
//!
//! After the last tick the day is aggregated into a `DaySummary`,
//! written as a `day` artifact and as metric rows. Both writes are
//! best effort.

use crate::{
    artifact::{persist_artifact, ArtifactRecord, DayArtifact, DayTickRef, DAY_ARTIFACT_VERSION},
    clock,
    engine::{derive_day_seed, SimEngine, Simulation},
    error::ErrorKind,
    store::MetricRow,
    tick::TickResult,
    timeline::{self, DayRecord},
    types::{AgentId, ArtifactId, DayId, DayNumber, DayStatus, TickStatus},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct DayOptions {
    /// Seed for a day that does not exist yet. Derived when absent.
    pub seed:       Option<u64>,
    pub sequential: Option<bool>,
}

/// One agent's day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDaySummary {
    pub agent_id:           AgentId,
    pub model_id:           String,
    pub ticks_participated: u32,
    pub success_count:      u32,
    pub fallback_count:     u32,
    pub failure_count:      u32,
    pub total_customers:    u64,
    pub total_revenue:      f64,
    pub avg_price:          f64,
    pub avg_quality:        f64,
    pub avg_marketing:      f64,
    pub avg_market_share:   f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub tick_count:           u32,
    pub completed_ticks:      u32,
    pub partial_ticks:        u32,
    pub failed_ticks:         u32,
    pub total_duration_ms:    u64,
    pub avg_tick_duration_ms: f64,
    pub success_count:        u32,
    pub fallback_count:       u32,
    pub failure_count:        u32,
    pub total_customers:      u64,
    pub total_revenue:        f64,
    pub agents:               Vec<AgentDaySummary>,
}

#[derive(Debug, Clone)]
pub struct DayResult {
    pub simulation_id: String,
    pub day_number:    DayNumber,
    pub day_id:        Option<DayId>,
    pub seed:          Option<u64>,
    pub status:        DayStatus,
    /// The run gate was held by another run; nothing was executed.
    pub refused:       bool,
    pub ticks:         Vec<TickResult>,
    pub summary:       Option<DaySummary>,
    pub artifact_id:   Option<ArtifactId>,
    pub error:         Option<String>,
    pub duration_ms:   u64,
}

impl DayResult {
    fn failed(simulation_id: &str, day_number: DayNumber, error: String, started: Instant) -> Self {
        Self {
            simulation_id: simulation_id.to_string(),
            day_number,
            day_id: None,
            seed: None,
            status: DayStatus::Failed,
            refused: false,
            ticks: Vec::new(),
            summary: None,
            artifact_id: None,
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Day status from tick statuses: all completed → completed,
/// all failed → failed, otherwise partial.
pub fn day_status(ticks: &[TickStatus]) -> DayStatus {
    if ticks.is_empty() || ticks.iter().all(|s| *s == TickStatus::Failed) {
        DayStatus::Failed
    } else if ticks.iter().all(|s| *s == TickStatus::Completed) {
        DayStatus::Completed
    } else {
        DayStatus::Partial
    }
}

/// Aggregate a day's tick results.
pub fn summarize_day(ticks: &[TickResult]) -> DaySummary {
    #[derive(Default)]
    struct Acc {
        model_id:      String,
        order:         usize,
        participated:  u32,
        success:       u32,
        fallback:      u32,
        failure:       u32,
        customers:     u64,
        revenue:       f64,
        price_sum:     f64,
        quality_sum:   f64,
        marketing_sum: f64,
        decisions:     u32,
        share_sum:     f64,
        markets:       u32,
    }

    let mut per_agent: HashMap<AgentId, Acc> = HashMap::new();
    for tick in ticks {
        let tick_total: u32 = tick.customer_events.iter().map(|e| e.customers).sum();
        for turn in &tick.agents {
            let next_order = per_agent.len();
            let acc = per_agent.entry(turn.agent_id.clone()).or_insert_with(|| Acc {
                model_id: turn.model_id.clone(),
                order: next_order,
                ..Acc::default()
            });
            acc.participated += 1;
            if turn.success {
                acc.success += 1;
            } else {
                acc.failure += 1;
            }
            if turn.used_fallback {
                acc.fallback += 1;
            }
            if let Some(d) = &turn.decision {
                acc.price_sum += d.price;
                acc.quality_sum += d.quality as f64;
                acc.marketing_sum += d.marketing as f64;
                acc.decisions += 1;
            }
        }
        for event in &tick.customer_events {
            if let Some(acc) = per_agent.get_mut(&event.agent_id) {
                acc.customers += event.customers as u64;
                acc.revenue += event.revenue;
                if tick_total > 0 {
                    acc.share_sum += event.customers as f64 / tick_total as f64;
                    acc.markets += 1;
                }
            }
        }
    }

    let avg = |sum: f64, n: u32| if n == 0 { 0.0 } else { sum / n as f64 };
    let mut agents: Vec<(usize, AgentDaySummary)> = per_agent
        .into_iter()
        .map(|(agent_id, a)| {
            (
                a.order,
                AgentDaySummary {
                    agent_id,
                    model_id: a.model_id,
                    ticks_participated: a.participated,
                    success_count: a.success,
                    fallback_count: a.fallback,
                    failure_count: a.failure,
                    total_customers: a.customers,
                    total_revenue: round2(a.revenue),
                    avg_price: round2(avg(a.price_sum, a.decisions)),
                    avg_quality: round2(avg(a.quality_sum, a.decisions)),
                    avg_marketing: round2(avg(a.marketing_sum, a.decisions)),
                    avg_market_share: avg(a.share_sum, a.markets),
                },
            )
        })
        .collect();
    agents.sort_by_key(|(order, _)| *order);
    let agents: Vec<AgentDaySummary> = agents.into_iter().map(|(_, a)| a).collect();

    let total_duration_ms: u64 = ticks.iter().map(|t| t.duration_ms).sum();
    DaySummary {
        tick_count: ticks.len() as u32,
        completed_ticks: ticks.iter().filter(|t| t.status == TickStatus::Completed).count() as u32,
        partial_ticks: ticks.iter().filter(|t| t.status == TickStatus::Partial).count() as u32,
        failed_ticks: ticks.iter().filter(|t| t.status == TickStatus::Failed).count() as u32,
        total_duration_ms,
        avg_tick_duration_ms: avg(total_duration_ms as f64, ticks.len() as u32),
        success_count: ticks.iter().map(TickResult::success_count).sum(),
        fallback_count: ticks.iter().map(TickResult::fallback_count).sum(),
        failure_count: ticks.iter().map(TickResult::failure_count).sum(),
        total_customers: agents.iter().map(|a| a.total_customers).sum(),
        total_revenue: round2(agents.iter().map(|a| a.total_revenue).sum()),
        agents,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl SimEngine {
    /// Run one day under the run gate.
    pub async fn run_day(&self, simulation_id: &str, day_number: DayNumber, options: DayOptions) -> DayResult {
        let started = Instant::now();
        let simulation = match self.store.get_simulation(simulation_id) {
            Ok(s) => s,
            Err(e) => return DayResult::failed(simulation_id, day_number, e.to_string(), started),
        };
        if let Err(e) = self.acquire_run(simulation_id) {
            let mut result = DayResult::failed(simulation_id, day_number, e.to_string(), started);
            result.refused = e.kind() == ErrorKind::Conflict;
            return result;
        }

        let result = self.execute_day(&simulation, day_number, options).await;

        let status = self.settled_status(&simulation).unwrap_or_else(|e| {
            log::warn!("simulation {simulation_id}: could not settle status: {e}");
            crate::types::SimulationStatus::Failed
        });
        self.release_run(simulation_id, status);
        result
    }

    /// Run every tick of one day. The caller holds the run gate.
    pub(crate) async fn execute_day(
        &self,
        simulation: &Simulation,
        day_number: DayNumber,
        options: DayOptions,
    ) -> DayResult {
        let started = Instant::now();
        let sim_id = simulation.simulation_id.as_str();

        let seed = options
            .seed
            .unwrap_or_else(|| derive_day_seed(simulation, day_number));
        let day = match timeline::ensure_day(
            &self.store,
            sim_id,
            day_number,
            seed,
            simulation.config.environment.as_ref(),
        ) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("day={day_number} day: bootstrap failed: {e}");
                return DayResult::failed(sim_id, day_number, format!("day bootstrap failed: {e}"), started);
            }
        };
        if let Err(e) = timeline::update_day_status(&self.store, &day.day_id, DayStatus::Running, None) {
            log::warn!("day={day_number} day: could not mark running: {e}");
        }
        log::info!(
            "day={day_number} day: starting, seed={} weather={} base_demand={}",
            day.seed,
            day.environment.weather.as_str(),
            day.environment.base_demand
        );

        let sequential = options.sequential.unwrap_or(simulation.config.sequential);
        let agents = self.store.list_agents(sim_id).ok();
        let mut ticks = Vec::with_capacity(clock::ticks_per_day());
        for hour in clock::business_hours() {
            let tick = self
                .execute_tick(simulation, &day, hour, agents.clone(), sequential)
                .await;
            ticks.push(tick);
        }

        let statuses: Vec<TickStatus> = ticks.iter().map(|t| t.status).collect();
        let status = day_status(&statuses);
        let summary = summarize_day(&ticks);
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = match status {
            DayStatus::Completed => None,
            _ => {
                let failing: Vec<String> = ticks
                    .iter()
                    .filter(|t| t.status != TickStatus::Completed)
                    .map(|t| format!("{}:00 {}", t.hour, t.status))
                    .collect();
                Some(format!("ticks not completed: {}", failing.join(", ")))
            }
        };

        let artifact_id = self.persist_day_artifact(&day, status, &ticks, &summary, duration_ms);
        self.persist_day_metrics(&day, &summary);

        if let Err(e) = timeline::update_day_status(&self.store, &day.day_id, status, error.as_deref()) {
            log::warn!("day={day_number} day: status update failed: {e}");
        }
        log::info!(
            "day={day_number} day: {status} in {duration_ms}ms ({} customers, ${:.2})",
            summary.total_customers,
            summary.total_revenue
        );

        DayResult {
            simulation_id: sim_id.to_string(),
            day_number,
            day_id: Some(day.day_id.clone()),
            seed: Some(day.seed),
            status,
            refused: false,
            ticks,
            summary: Some(summary),
            artifact_id,
            error,
            duration_ms,
        }
    }

    fn persist_day_artifact(
        &self,
        day: &DayRecord,
        status: DayStatus,
        ticks: &[TickResult],
        summary: &DaySummary,
        duration_ms: u64,
    ) -> Option<ArtifactId> {
        let payload = DayArtifact {
            version: DAY_ARTIFACT_VERSION,
            day_number: day.day_number,
            seed: day.seed,
            environment: day.environment.clone(),
            status,
            ticks: ticks
                .iter()
                .map(|t| DayTickRef {
                    hour: t.hour,
                    tick_id: t.tick_id.clone(),
                    status: t.status,
                    artifact_id: t.artifact_id.clone(),
                })
                .collect(),
            total_customers: summary.total_customers,
            total_revenue: summary.total_revenue,
            success_count: summary.success_count,
            fallback_count: summary.fallback_count,
            failure_count: summary.failure_count,
            duration_ms,
            agents: summary.agents.clone(),
        };
        let record = ArtifactRecord::day(&day.simulation_id, &day.day_id, payload);
        match persist_artifact(&self.store, &record) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("day={} day: artifact not persisted: {e}", day.day_number);
                None
            }
        }
    }

    fn persist_day_metrics(&self, day: &DayRecord, summary: &DaySummary) {
        let day_meta = json!({ "day_number": day.day_number, "seed": day.seed });
        let day_metric = |name: &str, value: f64| MetricRow {
            simulation_id: day.simulation_id.clone(),
            day_id: Some(day.day_id.clone()),
            agent_id: None,
            name: name.to_string(),
            value,
            metadata: day_meta.clone(),
        };

        let mut rows = vec![
            day_metric("day.total_customers", summary.total_customers as f64),
            day_metric("day.total_revenue", summary.total_revenue),
            day_metric("day.avg_tick_duration_ms", summary.avg_tick_duration_ms),
            day_metric("day.success_count", summary.success_count as f64),
            day_metric("day.fallback_count", summary.fallback_count as f64),
            day_metric("day.failure_count", summary.failure_count as f64),
        ];
        for a in &summary.agents {
            let meta = json!({
                "day_number": day.day_number,
                "seed": day.seed,
                "model_id": a.model_id,
            });
            for (name, value) in [
                ("agent.customers", a.total_customers as f64),
                ("agent.revenue", a.total_revenue),
                ("agent.avg_price", a.avg_price),
                ("agent.avg_quality", a.avg_quality),
                ("agent.avg_marketing", a.avg_marketing),
                ("agent.avg_market_share", a.avg_market_share),
                ("agent.fallback_count", a.fallback_count as f64),
            ] {
                rows.push(MetricRow {
                    simulation_id: day.simulation_id.clone(),
                    day_id: Some(day.day_id.clone()),
                    agent_id: Some(a.agent_id.clone()),
                    name: name.to_string(),
                    value,
                    metadata: meta.clone(),
                });
            }
        }

        if let Err(e) = self.store.append_metrics(&rows) {
            log::warn!("day={} day: metrics not persisted: {e}", day.day_number);
        }
    }
}
