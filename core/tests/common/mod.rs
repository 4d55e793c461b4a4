//! Shared fixtures for engine integration tests.
//!
//! `ScriptedGenerator` replays queued responses per model and records
//! every call. Models with an empty queue get a fixed valid decision;
//! models marked failing always return a transport error.

#![allow(dead_code)]

use async_trait::async_trait;
use lemonade_core::{
    config::{EngineConfig, SimulationConfig},
    engine::{Agent, SimEngine, Simulation},
    error::GenerationError,
    generator::DecisionGenerator,
    store::SimStore,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const DEFAULT_RESPONSE: &str =
    r#"{"price": 2.25, "quality": 6, "marketing": 40, "reasoning": "Scripted steady play."}"#;

#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, GenerationError>>>>,
    failing: Mutex<HashSet<String>>,
    calls:   Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue responses for one model, consumed in order.
    pub fn script(&self, model_id: &str, responses: Vec<Result<String, GenerationError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(model_id.to_string())
            .or_default()
            .extend(responses);
    }

    /// Every call for this model fails.
    pub fn fail_always(&self, model_id: &str) {
        self.failing.lock().unwrap().insert(model_id.to_string());
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, model_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == model_id)
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl DecisionGenerator for ScriptedGenerator {
    async fn generate(&self, model_id: &str, prompt: &str) -> Result<String, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((model_id.to_string(), prompt.to_string()));
        // Always suspend once so concurrent callers interleave.
        tokio::task::yield_now().await;

        if self.failing.lock().unwrap().contains(model_id) {
            return Err(GenerationError::Transport("scripted outage".into()));
        }
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(model_id)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(DEFAULT_RESPONSE.to_string()))
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn build_engine(generator: Arc<ScriptedGenerator>) -> SimEngine {
    build_engine_with(generator, EngineConfig::for_tests())
}

pub fn build_engine_with(generator: Arc<ScriptedGenerator>, config: EngineConfig) -> SimEngine {
    init_logging();
    let store = SimStore::in_memory_migrated().expect("in-memory store");
    SimEngine::new(Arc::new(store), generator, config)
}

pub fn create_test_simulation(engine: &SimEngine) -> (Simulation, Vec<Agent>) {
    let sim = engine
        .create_simulation("test market", SimulationConfig::default_test())
        .expect("create simulation");
    let agents = engine.list_agents(&sim.simulation_id).expect("list agents");
    (sim, agents)
}
