//! sim-runner: headless runner for the lemonade stand market.
//!
//! Usage:
//!   sim-runner --seed 12345 --days 5 --db run.db
//!   sim-runner --config market.json --sequential
//!   sim-runner --db run.db --resume <simulation-id>
//!   sim-runner --seed 7 --json
//!
//! Decisions come from the offline heuristic generator. Engine settings
//! (raw I/O capture, verbose turns) are read from LEMONADE_* variables.

use anyhow::{bail, Result};
use lemonade_core::{
    config::{EngineConfig, SimulationConfig},
    engine::{RunOptions, RunResult, RunStatus, SimEngine},
    generator::HeuristicGenerator,
    store::SimStore,
};
use serde::Serialize;
use std::env;
use std::sync::Arc;

#[derive(Serialize)]
struct AgentLine {
    model_id:         String,
    customers:        u64,
    revenue:          f64,
    avg_market_share: f64,
    fallbacks:        u32,
}

#[derive(Serialize)]
struct RunReport {
    simulation_id:   String,
    status:          RunStatus,
    days_run:        usize,
    skipped_days:    Vec<u32>,
    total_customers: u64,
    total_revenue:   f64,
    duration_ms:     u64,
    agents:          Vec<AgentLine>,
    error:           Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let days = parse_arg(&args, "--days", 0u32);
    let sequential = args.iter().any(|a| a == "--sequential");
    let json = args.iter().any(|a| a == "--json");
    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let config_path = str_arg(&args, "--config");
    let resume = str_arg(&args, "--resume");

    let store = if db == ":memory:" {
        SimStore::in_memory()?
    } else {
        SimStore::open(db)?
    };
    store.migrate()?;

    let engine = SimEngine::new(
        Arc::new(store),
        Arc::new(HeuristicGenerator),
        EngineConfig::from_env(),
    );

    let simulation_id = match resume {
        Some(id) => engine.get_simulation(id)?.simulation_id,
        None => {
            let mut config = match config_path {
                Some(path) => SimulationConfig::load(path)?,
                None => default_config(),
            };
            // --seed always wins; a config file without one keeps its derived seeds.
            if config_path.is_none() || args.iter().any(|a| a == "--seed") {
                config.seed = Some(seed);
            }
            if days > 0 {
                config.num_days = days;
            }
            config.sequential |= sequential;
            let name = format!("run-{seed}-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"));
            let sim = engine.create_simulation(&name, config)?;
            log::info!("created simulation {} ({name})", sim.simulation_id);
            sim.simulation_id
        }
    };

    if !json {
        let sim = engine.get_simulation(&simulation_id)?;
        println!("Lemonade stand market: sim-runner");
        println!("  simulation: {simulation_id}");
        println!("  seed:       {}", sim.config.seed.map_or("derived".to_string(), |s| s.to_string()));
        println!("  days:       {}", sim.config.num_days);
        println!("  agents:     {}", sim.config.agents.len());
        println!("  mode:       {}", if sim.config.sequential { "sequential" } else { "parallel" });
        println!("  db:         {db}");
        println!();
    }

    let options = RunOptions {
        sequential: sequential.then_some(true),
    };
    let result = engine.run_simulation(&simulation_id, options).await;
    let report = build_report(&engine, &result);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    match result.status {
        RunStatus::Completed | RunStatus::Partial => Ok(()),
        RunStatus::Refused => bail!("simulation {simulation_id} is already running"),
        RunStatus::Failed => bail!(
            "simulation {simulation_id} failed: {}",
            result.error.as_deref().unwrap_or("every day failed")
        ),
    }
}

fn default_config() -> SimulationConfig {
    let mut config = SimulationConfig::default_test();
    config.num_days = 5;
    config
}

fn build_report(engine: &SimEngine, result: &RunResult) -> RunReport {
    let mut agents: Vec<AgentLine> = engine
        .list_agents(&result.simulation_id)
        .unwrap_or_default()
        .into_iter()
        .map(|a| AgentLine {
            model_id: a.model_id,
            customers: 0,
            revenue: 0.0,
            avg_market_share: 0.0,
            fallbacks: 0,
        })
        .collect();

    let summaries: Vec<_> = result.days.iter().filter_map(|d| d.summary.as_ref()).collect();
    for line in &mut agents {
        let days: Vec<_> = summaries
            .iter()
            .flat_map(|s| s.agents.iter())
            .filter(|a| a.model_id == line.model_id)
            .collect();
        line.customers = days.iter().map(|a| a.total_customers).sum();
        line.revenue = days.iter().map(|a| a.total_revenue).sum();
        line.fallbacks = days.iter().map(|a| a.fallback_count).sum();
        if !days.is_empty() {
            line.avg_market_share =
                days.iter().map(|a| a.avg_market_share).sum::<f64>() / days.len() as f64;
        }
    }
    agents.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));

    RunReport {
        simulation_id: result.simulation_id.clone(),
        status: result.status,
        days_run: result.days.len(),
        skipped_days: result.skipped_days.clone(),
        total_customers: result.total_customers,
        total_revenue: result.total_revenue,
        duration_ms: result.duration_ms,
        agents,
        error: result.error.clone(),
    }
}

fn print_summary(report: &RunReport) {
    println!("=== RUN SUMMARY ===");
    println!("  status:         {:?}", report.status);
    println!("  days run:       {}", report.days_run);
    if !report.skipped_days.is_empty() {
        println!("  skipped days:   {:?}", report.skipped_days);
    }
    println!("  customers:      {}", report.total_customers);
    println!("  revenue:        ${:.2}", report.total_revenue);
    println!("  duration:       {}ms", report.duration_ms);
    if let Some(e) = &report.error {
        println!("  error:          {e}");
    }

    println!();
    println!("=== STANDINGS ===");
    if report.agents.is_empty() {
        println!("  (No agents)");
    }
    for a in &report.agents {
        println!(
            "  {:<16} | Revenue: ${:>9.2} | Customers: {:>6} | Share: {:>5.1}% | Fallbacks: {}",
            a.model_id,
            a.revenue,
            a.customers,
            a.avg_market_share * 100.0,
            a.fallbacks
        );
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
