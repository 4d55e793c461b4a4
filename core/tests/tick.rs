//! Tick orchestration tests.
//!
//! Tests cover: status derivation, demand conservation, idempotent
//! reruns, rerun over a wider roster, artifact repair, sequential and
//! parallel visibility, empty roster.

mod common;

use common::{build_engine, create_test_simulation, ScriptedGenerator};
use lemonade_core::{
    artifact::ArtifactKind,
    decision::DecisionRecord,
    error::GenerationError,
    prompt,
    tick::{tick_status, TickOptions},
    timeline,
    types::{new_id, TickStatus},
};

#[tokio::test]
async fn all_agents_succeed_and_demand_is_conserved() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, agents) = create_test_simulation(&engine);

    let tick = engine
        .run_tick(&sim.simulation_id, 1, 12, TickOptions::default())
        .await;
    assert_eq!(tick.status, TickStatus::Completed, "{:?}", tick.error);
    assert_eq!(tick.agents.len(), agents.len());
    assert_eq!(tick.success_count(), 3);
    assert!(tick.error.is_none());

    let market = tick.market.as_ref().expect("market summary");
    let served: u32 = tick.customer_events.iter().map(|e| e.customers).sum();
    assert_eq!(served, market.total_demand);
    assert_eq!(market.total_customers, market.total_demand);
    assert_eq!(market.participants, 3);

    let stored = engine.store().get_tick(tick.tick_id.as_deref().unwrap()).unwrap();
    assert_eq!(stored.status, TickStatus::Completed);
    let artifact = engine.store().get_artifact(tick.artifact_id.as_deref().unwrap()).unwrap();
    assert_eq!(artifact.kind, ArtifactKind::Tick);
}

#[tokio::test]
async fn one_failing_model_makes_the_tick_partial() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, _) = create_test_simulation(&engine);
    generator.fail_always("model-gamma");

    let tick = engine
        .run_tick(&sim.simulation_id, 1, 9, TickOptions::default())
        .await;
    assert_eq!(tick.status, TickStatus::Partial);
    assert_eq!(tick.success_count(), 2);
    assert_eq!(tick.fallback_count(), 1);
    assert_eq!(tick.failure_count(), 1);
    assert!(tick.error.as_deref().unwrap().contains("model-gamma"));

    // The fallback still competes for customers.
    assert_eq!(tick.customer_events.len(), 3);
}

#[tokio::test]
async fn every_model_failing_fails_the_tick() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, agents) = create_test_simulation(&engine);
    for a in &agents {
        generator.fail_always(&a.model_id);
    }

    let tick = engine
        .run_tick(&sim.simulation_id, 1, 9, TickOptions::default())
        .await;
    assert_eq!(tick.status, TickStatus::Failed);
    assert_eq!(tick.fallback_count(), 3);
    let stored = engine.store().get_tick(tick.tick_id.as_deref().unwrap()).unwrap();
    assert_eq!(stored.status, TickStatus::Failed);
    assert!(stored.error.is_some());
}

#[tokio::test]
async fn rerun_reuses_persisted_turns() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, _) = create_test_simulation(&engine);
    generator.script(
        "model-beta",
        vec![Err(GenerationError::Timeout)],
    );

    let first = engine
        .run_tick(&sim.simulation_id, 1, 14, TickOptions::default())
        .await;
    let calls_after_first = generator.calls().len();
    let second = engine
        .run_tick(&sim.simulation_id, 1, 14, TickOptions::default())
        .await;

    assert_eq!(generator.calls().len(), calls_after_first, "generator called again");
    assert_eq!(second.tick_id, first.tick_id);
    assert_eq!(second.artifact_id, first.artifact_id);
    assert_eq!(second.status, first.status);
    for (a, b) in first.agents.iter().zip(&second.agents) {
        assert!(b.reused_existing);
        assert_eq!(a.artifact_id, b.artifact_id);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.attempts, b.attempts, "attempt count recovered from artifact");
    }
    assert_eq!(second.market.unwrap().reused_events, 3);
    assert_eq!(engine.store().decision_count(&sim.simulation_id).unwrap(), 3);
    assert_eq!(
        engine
            .store()
            .artifact_count(&sim.simulation_id, ArtifactKind::AgentTurn)
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn sequential_agents_see_earlier_moves() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, _) = create_test_simulation(&engine);

    let tick = engine
        .run_tick(
            &sim.simulation_id,
            1,
            9,
            TickOptions {
                sequential: Some(true),
                ..TickOptions::default()
            },
        )
        .await;
    assert!(tick.sequential);
    assert_eq!(tick.status, TickStatus::Completed);

    let alpha = &generator.calls_for("model-alpha")[0];
    let beta = &generator.calls_for("model-beta")[0];
    let gamma = &generator.calls_for("model-gamma")[0];
    assert!(alpha.contains("no competitor decisions visible yet"));
    assert!(beta.contains("model-alpha (this hour)"));
    assert!(!beta.contains("model-gamma"));
    assert!(gamma.contains("model-alpha (this hour)") && gamma.contains("model-beta (this hour)"));
}

#[tokio::test]
async fn parallel_agents_see_only_the_previous_hour() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, _) = create_test_simulation(&engine);

    engine
        .run_tick(&sim.simulation_id, 1, 9, TickOptions::default())
        .await;
    let tick = engine
        .run_tick(&sim.simulation_id, 1, 10, TickOptions::default())
        .await;
    assert!(!tick.sequential);

    let beta = generator.calls_for("model-beta").pop().unwrap();
    assert!(beta.contains("model-alpha (last hour)"));
    assert!(beta.contains("model-gamma (last hour)"));
    assert!(!beta.contains("this hour"));
    assert!(beta.contains("Last hour's market"));
}

#[tokio::test]
async fn empty_roster_fails_without_calling_the_generator() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, _) = create_test_simulation(&engine);

    let tick = engine
        .run_tick(
            &sim.simulation_id,
            1,
            11,
            TickOptions {
                agents: Some(Vec::new()),
                ..TickOptions::default()
            },
        )
        .await;
    assert_eq!(tick.status, TickStatus::Failed);
    assert_eq!(tick.error.as_deref(), Some("no agents registered"));
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn hours_outside_business_hours_are_rejected() {
    let engine = build_engine(ScriptedGenerator::new());
    let (sim, _) = create_test_simulation(&engine);

    let tick = engine
        .run_tick(&sim.simulation_id, 1, 17, TickOptions::default())
        .await;
    assert_eq!(tick.status, TickStatus::Failed);
    assert!(tick.tick_id.is_none());
}

#[tokio::test]
async fn rerun_over_a_wider_roster_keeps_the_settled_market() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, agents) = create_test_simulation(&engine);

    let first = engine
        .run_tick(
            &sim.simulation_id,
            1,
            12,
            TickOptions {
                agents: Some(agents[..2].to_vec()),
                ..TickOptions::default()
            },
        )
        .await;
    assert_eq!(first.status, TickStatus::Completed);
    let total_demand = first.market.as_ref().unwrap().total_demand;

    let second = engine
        .run_tick(&sim.simulation_id, 1, 12, TickOptions::default())
        .await;
    let tick_id = second.tick_id.as_deref().unwrap();
    assert_eq!(engine.store().decisions_for_tick(tick_id).unwrap().len(), 3);

    let events = engine.store().customer_events_for_tick(tick_id).unwrap();
    assert_eq!(events.len(), 2, "no fresh share for the late agent");
    let served: u32 = events.iter().map(|e| e.customers).sum();
    assert_eq!(served, total_demand);

    let market = second.market.as_ref().unwrap();
    assert_eq!(market.total_demand, total_demand);
    assert_eq!(market.total_customers, total_demand);
    assert_eq!(second.status, TickStatus::Partial);
    let error = second.error.as_deref().unwrap();
    assert!(error.contains("already settled"));
    assert!(error.contains(&agents[2].agent_id));
}

#[tokio::test]
async fn run_tick_repairs_a_decision_without_artifact() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, agents) = create_test_simulation(&engine);
    let alpha = &agents[0];

    let day = timeline::ensure_day(engine.store(), &sim.simulation_id, 1, 42, None).unwrap();
    let tick = timeline::ensure_tick(engine.store(), &day, 13, None).unwrap();
    let orphan = DecisionRecord {
        decision_id: new_id(),
        simulation_id: sim.simulation_id.clone(),
        agent_id: alpha.agent_id.clone(),
        tick_id: tick.tick_id.clone(),
        day_number: 1,
        hour: 13,
        price: 3.0,
        quality: 8,
        marketing: 30,
        reasoning: "written before a crash".into(),
    };
    engine.store().insert_decision_if_absent(&orphan).unwrap();

    let result = engine
        .run_tick(&sim.simulation_id, 1, 13, TickOptions::default())
        .await;
    assert_eq!(result.status, TickStatus::Completed, "{:?}", result.error);
    assert!(generator.calls_for(&alpha.model_id).is_empty());
    let turn = &result.agents[0];
    assert!(turn.reused_existing && turn.was_regenerated);
    assert_eq!(turn.decision_id.as_deref(), Some(orphan.decision_id.as_str()));

    let alpha_artifacts = |engine: &lemonade_core::engine::SimEngine| {
        engine
            .store()
            .artifacts_for_tick(&tick.tick_id)
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == ArtifactKind::AgentTurn && a.agent_id.as_deref() == Some(alpha.agent_id.as_str()))
            .collect::<Vec<_>>()
    };
    let repaired = alpha_artifacts(&engine);
    assert_eq!(repaired.len(), 1);
    let payload = repaired[0].payload.as_agent_turn().unwrap();
    assert!(payload.was_regenerated);
    assert_eq!(payload.schema_hash, Some(prompt::schema_hash()));
    assert!(payload.prompt_hash.is_none());
    assert_eq!(payload.attempts, None);

    let again = engine
        .run_tick(&sim.simulation_id, 1, 13, TickOptions::default())
        .await;
    assert!(!again.agents[0].was_regenerated);
    assert_eq!(alpha_artifacts(&engine).len(), 1);
}

#[tokio::test]
async fn unrepairable_artifact_downgrades_status() {
    let generator = ScriptedGenerator::new();
    let engine = build_engine(generator.clone());
    let (sim, agents) = create_test_simulation(&engine);

    let healthy = engine
        .run_tick(&sim.simulation_id, 1, 9, TickOptions::default())
        .await;
    assert_eq!(tick_status(&healthy.agents), TickStatus::Completed);

    let day = timeline::ensure_day(engine.store(), &sim.simulation_id, 1, 42, None).unwrap();
    let tick = timeline::ensure_tick(engine.store(), &day, 15, None).unwrap();
    let orphan = DecisionRecord {
        decision_id: new_id(),
        simulation_id: sim.simulation_id.clone(),
        agent_id: agents[0].agent_id.clone(),
        tick_id: tick.tick_id.clone(),
        day_number: 1,
        hour: 15,
        price: 2.0,
        quality: 5,
        marketing: 50,
        reasoning: "kept".into(),
    };
    engine.store().insert_decision_if_absent(&orphan).unwrap();

    // The artifact references a day that does not exist, so it cannot be written.
    let broken = engine.reconcile_existing_turn(&orphan, &agents[0].model_id, "no-such-day");
    assert!(broken.success);
    assert!(!broken.was_regenerated);
    assert!(broken.artifact_id.is_none());
    assert!(broken.integrity_error.is_some());

    let mut turns = healthy.agents.clone();
    turns[0] = broken.clone();
    assert_eq!(tick_status(&turns), TickStatus::Partial);

    let mut all_failed = healthy.agents.clone();
    for t in &mut all_failed {
        t.success = false;
        t.used_fallback = true;
    }
    all_failed[0].integrity_error = broken.integrity_error.clone();
    assert_eq!(tick_status(&all_failed), TickStatus::Failed);
}
