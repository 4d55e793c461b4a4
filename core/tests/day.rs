//! Day orchestration tests.
//!
//! Tests cover: full day run, seed persistence, partial days,
//! summaries, artifacts and metrics.

mod common;

use common::{build_engine, create_test_simulation, ScriptedGenerator};
use lemonade_core::{
    artifact::{ArtifactKind, ArtifactPayload},
    clock,
    day::{day_status, DayOptions},
    types::{DayStatus, TickStatus},
};

#[tokio::test]
async fn run_day_runs_every_business_hour() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, _) = create_test_simulation(&engine);

    let day = engine.run_day(&sim.simulation_id, 1, DayOptions::default()).await;
    assert_eq!(day.status, DayStatus::Completed, "{:?}", day.error);
    assert!(!day.refused);
    assert_eq!(day.ticks.len(), clock::ticks_per_day());
    let hours: Vec<u32> = day.ticks.iter().map(|t| t.hour).collect();
    assert_eq!(hours, clock::business_hours().collect::<Vec<_>>());
    assert_eq!(generator.calls().len(), 3 * clock::ticks_per_day());

    let summary = day.summary.as_ref().expect("day summary");
    assert_eq!(summary.tick_count, 8);
    assert_eq!(summary.completed_ticks, 8);
    assert_eq!(summary.success_count, 24);
    assert_eq!(summary.agents.len(), 3);
    let per_agent: u64 = summary.agents.iter().map(|a| a.total_customers).sum();
    assert_eq!(per_agent, summary.total_customers);
    for a in &summary.agents {
        assert_eq!(a.ticks_participated, 8);
        assert_eq!(a.avg_price, 2.25);
    }

    let artifact = engine.store().get_artifact(day.artifact_id.as_deref().unwrap()).unwrap();
    match artifact.payload {
        ArtifactPayload::Day(d) => {
            assert_eq!(d.ticks.len(), 8);
            assert_eq!(d.total_customers, summary.total_customers);
            assert!(d.ticks.iter().all(|t| t.artifact_id.is_some()));
        }
        other => panic!("expected day artifact, got {:?}", other.kind()),
    }

    let metrics = engine.store().metrics_for_day(day.day_id.as_deref().unwrap()).unwrap();
    assert!(metrics.iter().any(|m| m.name == "day.total_customers"
        && m.value == summary.total_customers as f64));
    assert_eq!(metrics.iter().filter(|m| m.name == "agent.revenue").count(), 3);

    let stored = engine.store().get_day(day.day_id.as_deref().unwrap()).unwrap();
    assert_eq!(stored.status, DayStatus::Completed);
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn explicit_seed_is_kept_on_rerun() {
    let engine = build_engine(ScriptedGenerator::new());
    let (sim, _) = create_test_simulation(&engine);

    let first = engine
        .run_day(&sim.simulation_id, 1, DayOptions { seed: Some(5), sequential: None })
        .await;
    let second = engine
        .run_day(&sim.simulation_id, 1, DayOptions { seed: Some(9), sequential: None })
        .await;
    assert_eq!(first.seed, Some(5));
    assert_eq!(second.seed, Some(5));
    assert_eq!(first.day_id, second.day_id);
    assert_eq!(
        first.summary.unwrap().total_customers,
        second.summary.unwrap().total_customers
    );
    assert_eq!(
        engine
            .store()
            .artifact_count(&sim.simulation_id, ArtifactKind::Day)
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn a_failing_model_makes_the_day_partial() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, _) = create_test_simulation(&engine);
    generator.fail_always("model-beta");

    let day = engine.run_day(&sim.simulation_id, 2, DayOptions::default()).await;
    assert_eq!(day.status, DayStatus::Partial);
    assert!(day.ticks.iter().all(|t| t.status == TickStatus::Partial));
    let summary = day.summary.unwrap();
    assert_eq!(summary.fallback_count, 8);
    let beta = summary.agents.iter().find(|a| a.model_id == "model-beta").unwrap();
    assert_eq!(beta.fallback_count, 8);
    assert_eq!(beta.success_count, 0);
    assert!(day.error.as_deref().unwrap().contains("partial"));

    // Gate released to partial: day 1 never ran.
    assert_eq!(
        engine.get_simulation(&sim.simulation_id).unwrap().status,
        lemonade_core::types::SimulationStatus::Partial
    );
}

#[test]
fn day_status_rules() {
    use TickStatus::*;
    assert_eq!(day_status(&[Completed, Completed]), DayStatus::Completed);
    assert_eq!(day_status(&[Completed, Partial]), DayStatus::Partial);
    assert_eq!(day_status(&[Completed, Failed]), DayStatus::Partial);
    assert_eq!(day_status(&[Failed, Failed]), DayStatus::Failed);
    assert_eq!(day_status(&[]), DayStatus::Failed);
}
