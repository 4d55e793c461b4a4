use crate::{
    snapshot::{EnvironmentOverride, TickSnapshotOverride},
    types::Hour,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

// ── Simulation config ──────────────────────────────────────────────

/// One competitor in the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub model_id: String,
    #[serde(default)]
    pub strategy_hints: Option<String>,
}

/// Per-simulation configuration, stored as JSON on the simulation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub agents: Vec<AgentSpec>,
    #[serde(default = "default_num_days")]
    pub num_days: u32,
    /// Base seed for day seeds. Derived from the simulation id when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub environment: Option<EnvironmentOverride>,
    #[serde(default)]
    pub tick_snapshots: BTreeMap<Hour, TickSnapshotOverride>,
    /// Sequential visibility mode: later agents see earlier agents' current decisions.
    #[serde(default)]
    pub sequential: bool,
}

fn default_num_days() -> u32 {
    5
}

impl SimulationConfig {
    /// Load from a JSON file.
    /// In tests, use SimulationConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: SimulationConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config
            .validate()
            .map_err(|reason| anyhow::anyhow!("Invalid config {path}: {reason}"))?;
        Ok(config)
    }

    /// Three-agent config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        Self {
            agents: vec![
                AgentSpec { model_id: "model-alpha".into(), strategy_hints: Some("premium quality".into()) },
                AgentSpec { model_id: "model-beta".into(),  strategy_hints: Some("undercut on price".into()) },
                AgentSpec { model_id: "model-gamma".into(), strategy_hints: None },
            ],
            num_days: 2,
            seed: Some(42),
            environment: None,
            tick_snapshots: BTreeMap::new(),
            sequential: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.agents.is_empty() {
            return Err("agent roster is empty".into());
        }
        if self.num_days == 0 {
            return Err("num_days must be at least 1".into());
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.model_id.trim().is_empty() {
                return Err("agent model_id must not be blank".into());
            }
            if !seen.insert(agent.model_id.as_str()) {
                return Err(format!("duplicate agent model_id: {}", agent.model_id));
            }
        }
        for (hour, ov) in &self.tick_snapshots {
            if !crate::clock::is_business_hour(*hour) {
                return Err(format!("tick_snapshots: hour {hour} outside business hours"));
            }
            if let Some(m) = ov.demand_multiplier {
                if !m.is_finite() || m < 0.0 {
                    return Err(format!("tick_snapshots: hour {hour} multiplier must be >= 0"));
                }
            }
        }
        Ok(())
    }
}

// ── Engine config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEnvironment {
    Production,
    Development,
    Test,
}

impl RuntimeEnvironment {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "test"                => Self::Test,
            _                     => Self::Production,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Process-level engine settings.
///
/// Resolved once by the surrounding application and passed into
/// `SimEngine`. Engine code never reads environment variables itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub environment:      RuntimeEnvironment,
    /// Store raw prompt/response text on artifacts. Ignored in production.
    pub capture_raw_io:   bool,
    /// Extra per-attempt debug logging. Ignored in production.
    pub verbose_turns:    bool,
    pub max_attempts:     u32,
    /// Delay before attempt n (n >= 2) is `retry_base_delay * 2^(n-2)`.
    pub retry_base_delay: Duration,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment:      RuntimeEnvironment::Production,
            capture_raw_io:   false,
            verbose_turns:    false,
            max_attempts:     DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

impl EngineConfig {
    /// Resolve from process environment variables:
    /// `LEMONADE_ENV`, `LEMONADE_CAPTURE_RAW_IO`, `LEMONADE_VERBOSE_TURNS`.
    pub fn from_env() -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };
        Self {
            environment: std::env::var("LEMONADE_ENV")
                .map(|v| RuntimeEnvironment::parse(&v))
                .unwrap_or(RuntimeEnvironment::Production),
            capture_raw_io: flag("LEMONADE_CAPTURE_RAW_IO"),
            verbose_turns:  flag("LEMONADE_VERBOSE_TURNS"),
            ..Self::default()
        }
    }

    /// Test environment, no retry delays.
    pub fn for_tests() -> Self {
        Self {
            environment:      RuntimeEnvironment::Test,
            retry_base_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Whether raw model input/output must be withheld from artifacts.
    pub fn redact_raw_io(&self) -> bool {
        !(self.capture_raw_io && !self.environment.is_production())
    }

    pub fn verbose(&self) -> bool {
        self.verbose_turns && !self.environment.is_production()
    }

    /// Wait before the given 1-based attempt.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(16);
        self.retry_base_delay.saturating_mul(1u32 << shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_double() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.retry_delay(1), Duration::ZERO);
        assert_eq!(cfg.retry_delay(2), Duration::from_millis(500));
        assert_eq!(cfg.retry_delay(3), Duration::from_millis(1000));
    }

    #[test]
    fn raw_io_never_captured_in_production() {
        let cfg = EngineConfig {
            capture_raw_io: true,
            ..EngineConfig::default()
        };
        assert!(cfg.redact_raw_io());

        let dev = EngineConfig {
            capture_raw_io: true,
            environment: RuntimeEnvironment::Development,
            ..EngineConfig::default()
        };
        assert!(!dev.redact_raw_io());
    }

    #[test]
    fn duplicate_models_rejected() {
        let mut cfg = SimulationConfig::default_test();
        cfg.agents.push(AgentSpec { model_id: "model-alpha".into(), strategy_hints: None });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_parses_with_defaults() {
        let json = r#"{ "agents": [{ "model_id": "m1" }], "tick_snapshots": { "12": { "demand_multiplier": 2.0 } } }"#;
        let cfg: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.num_days, 5);
        assert!(!cfg.sequential);
        assert_eq!(cfg.tick_snapshots[&12].demand_multiplier, Some(2.0));
        assert!(cfg.validate().is_ok());
    }
}
