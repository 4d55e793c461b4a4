//! Agent turn: one agent's decision for one tick.
//!
//! PROTOCOL:
//!   1. Build the prompt (text + prompt hash + schema hash).
//!   2. Call the generator up to `max_attempts` times, waiting
//!      `retry_delay(attempt)` before each retry. Each raw response goes
//!      through the decision validator; the first usable one wins.
//!   3. No usable response: substitute the fallback decision.
//!   4. Insert-or-ignore the decision row, then the `agent_turn` artifact.
//!   5. If the decision row already existed, the persisted row is canonical.
//!      A missing artifact for it is regenerated from that row.
//!
//! Nothing here returns an error. Every failure lands in `AgentTurnResult`.

use crate::{
    artifact::{persist_artifact, AgentTurnArtifact, ArtifactRecord, AGENT_TURN_ARTIFACT_VERSION},
    decision::{
        fallback_decision, is_fallback_reasoning, parse_decision_text, Decision, DecisionRecord,
    },
    engine::SimEngine,
    error::{SimError, SimResult},
    prompt::{self, BuiltPrompt, PromptContext},
    types::{new_id, AgentId, ArtifactId, DayId, DayNumber, DecisionId, Hour, InsertOutcome, TickId},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Everything one turn needs. Owned so it can move into a spawned task.
#[derive(Debug, Clone)]
pub struct AgentTurnInput {
    pub simulation_id:     String,
    pub agent_id:          AgentId,
    pub model_id:          String,
    pub day_id:            DayId,
    pub tick_id:           TickId,
    pub day_number:        DayNumber,
    pub hour:              Hour,
    pub context:           PromptContext,
    /// Used only for the fallback decision.
    pub previous_decision: Option<Decision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTurnResult {
    pub agent_id:        AgentId,
    pub model_id:        String,
    /// The generator produced a usable decision.
    pub success:         bool,
    pub used_fallback:   bool,
    pub was_coerced:     bool,
    /// The canonical persisted decision, when one exists.
    pub decision:        Option<Decision>,
    pub decision_id:     Option<DecisionId>,
    pub artifact_id:     Option<ArtifactId>,
    pub attempts:        u32,
    pub duration_ms:     u64,
    /// The decision was already persisted by an earlier or concurrent caller.
    pub reused_existing: bool,
    pub was_regenerated: bool,
    pub error:           Option<String>,
    /// A persisted decision is left without an artifact.
    pub integrity_error: Option<String>,
}

impl AgentTurnResult {
    fn empty(agent_id: &str, model_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            model_id: model_id.to_string(),
            success: false,
            used_fallback: false,
            was_coerced: false,
            decision: None,
            decision_id: None,
            artifact_id: None,
            attempts: 0,
            duration_ms: 0,
            reused_existing: false,
            was_regenerated: false,
            error: None,
            integrity_error: None,
        }
    }

    /// Result for an agent whose turn task never completed.
    pub fn aborted(agent_id: &str, model_id: &str, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::empty(agent_id, model_id)
        }
    }

    /// The agent has a persisted decision this tick, success or fallback.
    pub fn has_decision(&self) -> bool {
        self.decision.is_some() && self.decision_id.is_some()
    }
}

/// What the generation loop produced, before persistence.
struct Generated {
    decision:      Decision,
    success:       bool,
    used_fallback: bool,
    was_coerced:   bool,
    attempts:      u32,
    errors:        Vec<String>,
    raw_response:  Option<String>,
}

impl SimEngine {
    /// Run the full turn protocol for one agent.
    pub async fn run_agent_turn(&self, input: AgentTurnInput) -> AgentTurnResult {
        let started = Instant::now();
        let prompt = self.prompts.build(&input.context);

        let generated = self.generate_with_retries(&input, &prompt).await;
        let mut result = AgentTurnResult {
            success: generated.success,
            used_fallback: generated.used_fallback,
            was_coerced: generated.was_coerced,
            attempts: generated.attempts,
            error: (!generated.errors.is_empty()).then(|| generated.errors.join("; ")),
            ..AgentTurnResult::empty(&input.agent_id, &input.model_id)
        };

        let candidate = DecisionRecord {
            decision_id: new_id(),
            simulation_id: input.simulation_id.clone(),
            agent_id: input.agent_id.clone(),
            tick_id: input.tick_id.clone(),
            day_number: input.day_number,
            hour: input.hour,
            price: generated.decision.price,
            quality: generated.decision.quality,
            marketing: generated.decision.marketing,
            reasoning: generated.decision.reasoning.clone(),
        };

        let outcome = match self.store.insert_decision_if_absent(&candidate) {
            Ok(o) => o,
            Err(e) => {
                log::warn!(
                    "day={} hour={} turn: {} decision not persisted: {e}",
                    input.day_number,
                    input.hour,
                    input.model_id
                );
                result.success = false;
                result.error = Some(append_error(result.error.take(), &format!("decision not persisted: {e}")));
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        match outcome {
            InsertOutcome::Inserted => {
                result.decision = Some(generated.decision.clone());
                result.decision_id = Some(candidate.decision_id.clone());
                result.duration_ms = started.elapsed().as_millis() as u64;

                let redacted = self.config.redact_raw_io();
                let payload = AgentTurnArtifact {
                    version: AGENT_TURN_ARTIFACT_VERSION,
                    model_id: input.model_id.clone(),
                    day_number: input.day_number,
                    hour: input.hour,
                    decision_id: candidate.decision_id.clone(),
                    decision: generated.decision,
                    success: Some(generated.success),
                    used_fallback: Some(generated.used_fallback),
                    was_coerced: Some(generated.was_coerced),
                    was_regenerated: false,
                    attempts: Some(generated.attempts),
                    duration_ms: Some(result.duration_ms),
                    attempt_errors: generated.errors,
                    prompt_hash: Some(prompt.prompt_hash.clone()),
                    schema_hash: Some(prompt.schema_hash.clone()),
                    raw_prompt: (!redacted).then(|| prompt.text.clone()),
                    raw_response: if redacted { None } else { generated.raw_response },
                };
                let record = ArtifactRecord::agent_turn(
                    &input.simulation_id,
                    &input.day_id,
                    &input.tick_id,
                    &input.agent_id,
                    payload,
                    redacted,
                );
                match persist_artifact(&self.store, &record) {
                    Ok(id) => result.artifact_id = Some(id),
                    Err(e) => {
                        log::warn!(
                            "day={} hour={} turn: {} artifact not persisted: {e}",
                            input.day_number,
                            input.hour,
                            input.model_id
                        );
                        result.integrity_error = Some(format!("agent_turn artifact not persisted: {e}"));
                    }
                }
            }
            InsertOutcome::Existing => {
                // Another caller wrote this (tick, agent) first. Its row wins.
                let canonical = match self.store.decision_for_tick(
                    &input.simulation_id,
                    &input.agent_id,
                    &input.tick_id,
                ) {
                    Ok(Some(d)) => d,
                    Ok(None) => {
                        result.success = false;
                        result.error = Some(append_error(
                            result.error.take(),
                            "decision conflict reported but no row found",
                        ));
                        result.duration_ms = started.elapsed().as_millis() as u64;
                        return result;
                    }
                    Err(e) => {
                        result.success = false;
                        result.error = Some(append_error(result.error.take(), &format!("decision lookup failed: {e}")));
                        result.duration_ms = started.elapsed().as_millis() as u64;
                        return result;
                    }
                };
                log::debug!(
                    "day={} hour={} turn: {} decision already persisted, keeping it",
                    input.day_number,
                    input.hour,
                    input.model_id
                );
                // This caller's generation is discarded; report the canonical turn.
                let fallback = is_fallback_reasoning(&canonical.reasoning);
                result = AgentTurnResult {
                    success: !fallback,
                    used_fallback: fallback,
                    reused_existing: true,
                    ..AgentTurnResult::empty(&input.agent_id, &input.model_id)
                };
                self.attach_artifact(&canonical, &input.model_id, &input.day_id, &mut result);
                self.apply_recorded_outcome(&mut result);
                result.duration_ms = started.elapsed().as_millis() as u64;
            }
        }
        result
    }

    /// Settle a turn whose decision is already persisted, without calling
    /// the generator. Used when a tick is retried.
    pub fn reconcile_existing_turn(
        &self,
        existing: &DecisionRecord,
        model_id: &str,
        day_id: &str,
    ) -> AgentTurnResult {
        let started = Instant::now();
        let fallback = is_fallback_reasoning(&existing.reasoning);
        let mut result = AgentTurnResult {
            success: !fallback,
            used_fallback: fallback,
            reused_existing: true,
            ..AgentTurnResult::empty(&existing.agent_id, model_id)
        };
        self.attach_artifact(existing, model_id, day_id, &mut result);
        self.apply_recorded_outcome(&mut result);
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// Copy how the decision was reached from its artifact, when the
    /// artifact recorded it. Regenerated artifacts leave the defaults.
    fn apply_recorded_outcome(&self, result: &mut AgentTurnResult) {
        let Some(id) = &result.artifact_id else {
            return;
        };
        let Ok(artifact) = self.store.get_artifact(id) else {
            return;
        };
        if let Some(turn) = artifact.payload.as_agent_turn() {
            if let Some(success) = turn.success {
                result.success = success;
            }
            if let Some(used) = turn.used_fallback {
                result.used_fallback = used;
            }
            result.was_coerced = turn.was_coerced.unwrap_or(false);
            result.attempts = turn.attempts.unwrap_or(0);
            if !turn.attempt_errors.is_empty() {
                result.error = Some(turn.attempt_errors.join("; "));
            }
        }
    }

    /// Point `result` at the canonical decision and its artifact,
    /// regenerating the artifact when it is missing.
    fn attach_artifact(
        &self,
        canonical: &DecisionRecord,
        model_id: &str,
        day_id: &str,
        result: &mut AgentTurnResult,
    ) {
        result.decision = Some(canonical.decision());
        result.decision_id = Some(canonical.decision_id.clone());

        match self.store.agent_turn_artifact_id(&canonical.tick_id, &canonical.agent_id) {
            Ok(Some(id)) => result.artifact_id = Some(id),
            Ok(None) => match self.regenerate_agent_turn_artifact(canonical, model_id, day_id) {
                Ok(id) => {
                    result.artifact_id = Some(id);
                    result.was_regenerated = true;
                }
                Err(e) => {
                    log::warn!(
                        "day={} hour={} turn: {model_id} artifact regeneration failed: {e}",
                        canonical.day_number,
                        canonical.hour
                    );
                    result.integrity_error = Some(format!("agent_turn artifact missing and not regenerated: {e}"));
                }
            },
            Err(e) => {
                result.integrity_error = Some(format!("agent_turn artifact lookup failed: {e}"));
            }
        }
    }

    /// Write a minimal artifact for a decision that has none. Operational
    /// metadata and the prompt hash are unknown and left empty; the schema
    /// hash is a constant and always recorded. A concurrent regeneration that
    /// wins the insert is looked up instead.
    pub fn regenerate_agent_turn_artifact(
        &self,
        canonical: &DecisionRecord,
        model_id: &str,
        day_id: &str,
    ) -> SimResult<ArtifactId> {
        log::warn!(
            "day={} hour={} turn: {model_id} decision {} has no artifact, regenerating",
            canonical.day_number,
            canonical.hour,
            canonical.decision_id
        );
        let payload = AgentTurnArtifact {
            version: AGENT_TURN_ARTIFACT_VERSION,
            model_id: model_id.to_string(),
            day_number: canonical.day_number,
            hour: canonical.hour,
            decision_id: canonical.decision_id.clone(),
            decision: canonical.decision(),
            success: None,
            used_fallback: None,
            was_coerced: None,
            was_regenerated: true,
            attempts: None,
            duration_ms: None,
            attempt_errors: Vec::new(),
            prompt_hash: None,
            schema_hash: Some(prompt::schema_hash()),
            raw_prompt: None,
            raw_response: None,
        };
        let record = ArtifactRecord::agent_turn(
            &canonical.simulation_id,
            day_id,
            &canonical.tick_id,
            &canonical.agent_id,
            payload,
            true,
        );
        persist_artifact(&self.store, &record).map_err(|e| match e {
            SimError::NotFound { .. } => SimError::Validation(format!(
                "agent_turn artifact for decision {} neither inserted nor found",
                canonical.decision_id
            )),
            other => other,
        })
    }

    async fn generate_with_retries(&self, input: &AgentTurnInput, prompt: &BuiltPrompt) -> Generated {
        let max_attempts = self.config.max_attempts.max(1);
        let mut errors = Vec::new();
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let delay = self.config.retry_delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let raw = match self.generator.generate(&input.model_id, &prompt.text).await {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!(
                        "day={} hour={} turn: {} attempt {attempt}/{max_attempts} failed: {e}",
                        input.day_number,
                        input.hour,
                        input.model_id
                    );
                    errors.push(format!("attempt {attempt}: {e}"));
                    continue;
                }
            };
            if self.config.verbose() {
                log::debug!(
                    "day={} hour={} turn: {} attempt {attempt} returned {} chars",
                    input.day_number,
                    input.hour,
                    input.model_id,
                    raw.len()
                );
            }

            match parse_decision_text(&raw) {
                Ok(validated) => {
                    return Generated {
                        decision: validated.decision,
                        success: true,
                        used_fallback: false,
                        was_coerced: validated.was_coerced,
                        attempts,
                        errors,
                        raw_response: Some(raw),
                    };
                }
                Err(e) => {
                    log::warn!(
                        "day={} hour={} turn: {} attempt {attempt}/{max_attempts} unusable: {e}",
                        input.day_number,
                        input.hour,
                        input.model_id
                    );
                    errors.push(format!("attempt {attempt}: {e}"));
                }
            }
        }

        log::warn!(
            "day={} hour={} turn: {} exhausted {attempts} attempts, using fallback",
            input.day_number,
            input.hour,
            input.model_id
        );
        Generated {
            decision: fallback_decision(input.previous_decision.as_ref()),
            success: false,
            used_fallback: true,
            was_coerced: false,
            attempts,
            errors,
            raw_response: None,
        }
    }
}

fn append_error(existing: Option<String>, message: &str) -> String {
    match existing {
        Some(e) => format!("{e}; {message}"),
        None => message.to_string(),
    }
}
