//! Seeded timeline tests.
//!
//! Tests cover: seed determinism, override merging, hourly pattern,
//! idempotent day/tick creation, status transitions.

use lemonade_core::{
    clock,
    config::SimulationConfig,
    snapshot::{EnvironmentOverride, TickSnapshotOverride, Weather},
    store::SimStore,
    timeline::{self, resolve_environment, resolve_tick_snapshot, SPECIAL_EVENTS},
    types::{DayStatus, TickStatus},
};

fn store_with_simulation(simulation_id: &str) -> SimStore {
    let store = SimStore::in_memory_migrated().expect("in-memory store");
    store
        .insert_simulation(simulation_id, "timeline test", &SimulationConfig::default_test())
        .expect("insert simulation");
    store
}

#[test]
fn same_seed_same_environment() {
    for seed in [0_u64, 1, 42, 0xDEAD_BEEF, u64::MAX] {
        let a = resolve_environment(seed, None);
        let b = resolve_environment(seed, None);
        assert_eq!(a, b, "environment diverged for seed {seed}");
    }
}

#[test]
fn seeded_environment_stays_in_weather_ranges() {
    let mut saw_event = false;
    let mut weathers = std::collections::HashSet::new();
    for seed in 0..500_u64 {
        let env = resolve_environment(seed, None);
        let (t_min, t_max) = env.weather.temperature_range();
        let (d_min, d_max) = env.weather.base_demand_range();
        assert!((t_min..=t_max).contains(&env.temperature), "seed {seed}: {env:?}");
        assert!((d_min..=d_max).contains(&(env.base_demand as i64)), "seed {seed}: {env:?}");
        if let Some(event) = &env.special_event {
            assert!(SPECIAL_EVENTS.contains(&event.as_str()));
            saw_event = true;
        }
        weathers.insert(env.weather.as_str());
    }
    assert!(saw_event, "500 seeds at 10% should roll at least one special event");
    assert_eq!(weathers.len(), Weather::ALL.len());
}

#[test]
fn override_merges_over_seeded_values() {
    let seeded = resolve_environment(7, None);
    let over = EnvironmentOverride {
        weather: Some(Weather::Rainy),
        base_demand: Some(250),
        ..EnvironmentOverride::default()
    };
    let merged = resolve_environment(7, Some(&over));
    assert_eq!(merged.weather, Weather::Rainy);
    assert_eq!(merged.base_demand, 250);
    assert_eq!(merged.temperature, seeded.temperature);
    assert_eq!(merged.special_event, seeded.special_event);

    let cleared = EnvironmentOverride {
        special_event: Some(None),
        ..EnvironmentOverride::default()
    };
    assert_eq!(resolve_environment(7, Some(&cleared)).special_event, None);
}

#[test]
fn tick_snapshots_follow_the_day_pattern() {
    for seed in [3_u64, 99, 12345] {
        for hour in clock::business_hours() {
            let snap = resolve_tick_snapshot(seed, hour, None);
            assert_eq!(snap, resolve_tick_snapshot(seed, hour, None));
            assert!(snap.demand_multiplier > 0.0 && snap.demand_multiplier <= 1.6);
        }
        let lunch = resolve_tick_snapshot(seed, 12, None);
        let opening = resolve_tick_snapshot(seed, 9, None);
        assert_eq!(lunch.event.as_deref(), Some("lunch_rush"));
        assert!(lunch.demand_multiplier > opening.demand_multiplier);
        assert_eq!(opening.event, None);
    }

    let over = TickSnapshotOverride {
        demand_multiplier: Some(2.5),
        event: None,
    };
    let snap = resolve_tick_snapshot(3, 12, Some(&over));
    assert_eq!(snap.demand_multiplier, 2.5);
    assert_eq!(snap.event.as_deref(), Some("lunch_rush"));
}

#[test]
fn ensure_day_keeps_first_seed() {
    let store = store_with_simulation("sim-day");
    let first = timeline::ensure_day(&store, "sim-day", 1, 1111, None).unwrap();
    let second = timeline::ensure_day(&store, "sim-day", 1, 2222, None).unwrap();

    assert_eq!(first.day_id, second.day_id);
    assert_eq!(second.seed, 1111);
    assert_eq!(second.environment, resolve_environment(1111, None));
    assert_eq!(store.days_for_simulation("sim-day").unwrap().len(), 1);
}

#[test]
fn ensure_tick_keeps_first_snapshot() {
    let store = store_with_simulation("sim-tick");
    let day = timeline::ensure_day(&store, "sim-tick", 2, 5, None).unwrap();
    let over = TickSnapshotOverride {
        demand_multiplier: Some(3.0),
        event: Some("parade".into()),
    };
    let first = timeline::ensure_tick(&store, &day, 10, None).unwrap();
    let second = timeline::ensure_tick(&store, &day, 10, Some(&over)).unwrap();
    assert_eq!(first.tick_id, second.tick_id);
    assert_eq!(second.snapshot, first.snapshot);
    assert_eq!(first.day_id, day.day_id);
}

#[test]
fn status_transitions_set_and_clear_fields() {
    let store = store_with_simulation("sim-status");
    let day = timeline::ensure_day(&store, "sim-status", 1, 9, None).unwrap();
    let tick = timeline::ensure_tick(&store, &day, 9, None).unwrap();
    assert_eq!(tick.status, TickStatus::Pending);

    timeline::update_tick_status(&store, &tick.tick_id, TickStatus::Failed, Some("boom")).unwrap();
    let failed = store.get_tick(&tick.tick_id).unwrap();
    assert_eq!(failed.status, TickStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("boom"));
    assert!(failed.finished_at.is_some());

    timeline::update_tick_status(&store, &tick.tick_id, TickStatus::Running, None).unwrap();
    let running = store.get_tick(&tick.tick_id).unwrap();
    assert_eq!(running.status, TickStatus::Running);
    assert_eq!(running.error, None);
    assert_eq!(running.finished_at, None);
    assert!(running.started_at.is_some());

    timeline::update_day_status(&store, &day.day_id, DayStatus::Completed, None).unwrap();
    let done = store.get_day(&day.day_id).unwrap();
    assert_eq!(done.status, DayStatus::Completed);
    assert!(done.finished_at.is_some());

    assert!(timeline::update_day_status(&store, "no-such-day", DayStatus::Running, None).is_err());
}
