//! Provenance artifacts.
//!
//! One immutable row per engine operation outcome. The payload is a
//! tagged variant per kind; each variant carries its own `version` so
//! readers can branch on shape as variants evolve.
//!
//! RULES:
//!   - Artifacts are inserted once or looked up, never updated.
//!   - Raw prompt/response text appears only when the engine config
//!     allows it. The record's `redacted` flag says which.
//!   - Prompt and schema hashes are kept whether or not raw text is.

use crate::{
    day::AgentDaySummary,
    decision::Decision,
    demand::MarketSummary,
    error::{SimError, SimResult},
    snapshot::EnvironmentSnapshot,
    store::SimStore,
    types::{
        new_id, now_timestamp, AgentId, ArtifactId, DayId, DayNumber, DayStatus, Hour,
        InsertOutcome, SimulationStatus, TickId, TickStatus,
    },
};
use serde::{Deserialize, Serialize};

pub const AGENT_TURN_ARTIFACT_VERSION: u32 = 1;
pub const TICK_ARTIFACT_VERSION: u32 = 1;
pub const DAY_ARTIFACT_VERSION: u32 = 1;
pub const RUN_SUMMARY_ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    AgentTurn,
    Tick,
    Day,
    RunSummary,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentTurn  => "agent_turn",
            Self::Tick       => "tick",
            Self::Day        => "day",
            Self::RunSummary => "run_summary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent_turn"  => Some(Self::AgentTurn),
            "tick"        => Some(Self::Tick),
            "day"         => Some(Self::Day),
            "run_summary" => Some(Self::RunSummary),
            _             => None,
        }
    }
}

// ── Payload variants ─────────────────────────────────────────────────────────

/// Outcome of one agent's turn in one tick.
///
/// A regenerated artifact (rebuilt from a persisted decision whose original
/// artifact was never written) leaves every operational field `None`:
/// attempts, timing, fallback use and hashes are unknown, not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTurnArtifact {
    pub version:         u32,
    pub model_id:        String,
    pub day_number:      DayNumber,
    pub hour:            Hour,
    pub decision_id:     String,
    pub decision:        Decision,
    pub success:         Option<bool>,
    pub used_fallback:   Option<bool>,
    pub was_coerced:     Option<bool>,
    pub was_regenerated: bool,
    pub attempts:        Option<u32>,
    pub duration_ms:     Option<u64>,
    #[serde(default)]
    pub attempt_errors:  Vec<String>,
    pub prompt_hash:     Option<String>,
    pub schema_hash:     Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_prompt:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response:    Option<String>,
}

/// Reference to one agent's turn inside a tick artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickAgentRef {
    pub agent_id:      AgentId,
    pub model_id:      String,
    /// Empty when the agent-turn artifact could not be written.
    pub artifact_id:   Option<ArtifactId>,
    pub success:       bool,
    pub used_fallback: bool,
    pub error:         Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickArtifact {
    pub version:     u32,
    pub day_number:  DayNumber,
    pub hour:        Hour,
    pub status:      TickStatus,
    pub sequential:  bool,
    pub agents:      Vec<TickAgentRef>,
    pub market:      Option<MarketSummary>,
    pub error:       Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayTickRef {
    pub hour:        Hour,
    pub tick_id:     Option<TickId>,
    pub status:      TickStatus,
    pub artifact_id: Option<ArtifactId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayArtifact {
    pub version:         u32,
    pub day_number:      DayNumber,
    pub seed:            u64,
    pub environment:     EnvironmentSnapshot,
    pub status:          DayStatus,
    pub ticks:           Vec<DayTickRef>,
    pub total_customers: u64,
    pub total_revenue:   f64,
    pub success_count:   u32,
    pub fallback_count:  u32,
    pub failure_count:   u32,
    pub duration_ms:     u64,
    pub agents:          Vec<AgentDaySummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDayRef {
    pub day_number:  DayNumber,
    pub day_id:      Option<DayId>,
    pub status:      DayStatus,
    pub artifact_id: Option<ArtifactId>,
    pub skipped:     bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummaryArtifact {
    pub version:         u32,
    pub status:          SimulationStatus,
    pub days:            Vec<RunDayRef>,
    pub total_customers: u64,
    pub total_revenue:   f64,
    pub duration_ms:     u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    AgentTurn(AgentTurnArtifact),
    Tick(TickArtifact),
    Day(DayArtifact),
    RunSummary(RunSummaryArtifact),
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::AgentTurn(_)  => ArtifactKind::AgentTurn,
            Self::Tick(_)       => ArtifactKind::Tick,
            Self::Day(_)        => ArtifactKind::Day,
            Self::RunSummary(_) => ArtifactKind::RunSummary,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Self::AgentTurn(a)  => a.version,
            Self::Tick(t)       => t.version,
            Self::Day(d)        => d.version,
            Self::RunSummary(r) => r.version,
        }
    }

    pub fn as_agent_turn(&self) -> Option<&AgentTurnArtifact> {
        match self {
            Self::AgentTurn(a) => Some(a),
            _ => None,
        }
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

/// Row from the `artifact` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id:   ArtifactId,
    pub simulation_id: String,
    pub kind:          ArtifactKind,
    pub day_id:        Option<DayId>,
    pub tick_id:       Option<TickId>,
    pub agent_id:      Option<AgentId>,
    pub payload:       ArtifactPayload,
    pub redacted:      bool,
    pub prompt_hash:   Option<String>,
    pub schema_hash:   Option<String>,
    pub created_at:    String,
}

impl ArtifactRecord {
    fn new(simulation_id: &str, payload: ArtifactPayload) -> Self {
        Self {
            artifact_id: new_id(),
            simulation_id: simulation_id.to_string(),
            kind: payload.kind(),
            day_id: None,
            tick_id: None,
            agent_id: None,
            payload,
            redacted: false,
            prompt_hash: None,
            schema_hash: None,
            created_at: now_timestamp(),
        }
    }

    pub fn agent_turn(
        simulation_id: &str,
        day_id: &str,
        tick_id: &str,
        agent_id: &str,
        payload: AgentTurnArtifact,
        redacted: bool,
    ) -> Self {
        let prompt_hash = payload.prompt_hash.clone();
        let schema_hash = payload.schema_hash.clone();
        Self {
            day_id: Some(day_id.to_string()),
            tick_id: Some(tick_id.to_string()),
            agent_id: Some(agent_id.to_string()),
            redacted,
            prompt_hash,
            schema_hash,
            ..Self::new(simulation_id, ArtifactPayload::AgentTurn(payload))
        }
    }

    pub fn tick(simulation_id: &str, day_id: &str, tick_id: &str, payload: TickArtifact) -> Self {
        Self {
            day_id: Some(day_id.to_string()),
            tick_id: Some(tick_id.to_string()),
            ..Self::new(simulation_id, ArtifactPayload::Tick(payload))
        }
    }

    pub fn day(simulation_id: &str, day_id: &str, payload: DayArtifact) -> Self {
        Self {
            day_id: Some(day_id.to_string()),
            ..Self::new(simulation_id, ArtifactPayload::Day(payload))
        }
    }

    pub fn run_summary(simulation_id: &str, payload: RunSummaryArtifact) -> Self {
        Self::new(simulation_id, ArtifactPayload::RunSummary(payload))
    }
}

/// Insert the artifact, or return the id of the one already occupying
/// its natural key. The first writer's artifact is canonical.
pub fn persist_artifact(store: &SimStore, record: &ArtifactRecord) -> SimResult<ArtifactId> {
    match store.insert_artifact_if_absent(record)? {
        InsertOutcome::Inserted => Ok(record.artifact_id.clone()),
        InsertOutcome::Existing => store
            .existing_artifact_id(record)?
            .ok_or_else(|| SimError::not_found("artifact", format!("{} for {}", record.kind.as_str(), record.simulation_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn_payload() -> AgentTurnArtifact {
        AgentTurnArtifact {
            version: AGENT_TURN_ARTIFACT_VERSION,
            model_id: "model-alpha".into(),
            day_number: 1,
            hour: 9,
            decision_id: "d1".into(),
            decision: Decision::defaults("steady"),
            success: Some(true),
            used_fallback: Some(false),
            was_coerced: Some(false),
            was_regenerated: false,
            attempts: Some(1),
            duration_ms: Some(12),
            attempt_errors: Vec::new(),
            prompt_hash: Some("p".into()),
            schema_hash: Some("s".into()),
            raw_prompt: None,
            raw_response: None,
        }
    }

    #[test]
    fn payload_is_tagged_by_kind() {
        let payload = ArtifactPayload::AgentTurn(turn_payload());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "agent_turn");
        assert_eq!(json["version"], 1);
        assert!(json.get("raw_prompt").is_none());

        let back: ArtifactPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), ArtifactKind::AgentTurn);
        assert_eq!(back, payload);
    }

    #[test]
    fn agent_turn_record_copies_hashes() {
        let rec = ArtifactRecord::agent_turn("sim", "day", "tick", "agent", turn_payload(), true);
        assert_eq!(rec.kind, ArtifactKind::AgentTurn);
        assert_eq!(rec.prompt_hash.as_deref(), Some("p"));
        assert_eq!(rec.schema_hash.as_deref(), Some("s"));
        assert!(rec.redacted);
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in [ArtifactKind::AgentTurn, ArtifactKind::Tick, ArtifactKind::Day, ArtifactKind::RunSummary] {
            assert_eq!(ArtifactKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ArtifactKind::parse("bogus"), None);
    }
}
