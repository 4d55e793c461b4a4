//! Prompt construction for agent turns.
//!
//! A `PromptBuilder` is pure: the same `PromptContext` always renders the
//! same text, and therefore the same `prompt_hash`. Both hashes are
//! recorded on every agent-turn artifact, including redacted ones.

use crate::{
    decision::{Decision, MAX_MARKETING, MAX_PRICE, MAX_QUALITY, MAX_REASONING_CHARS, MIN_MARKETING, MIN_PRICE, MIN_QUALITY},
    snapshot::{EnvironmentSnapshot, TickSnapshot},
    types::{AgentId, DayNumber, Hour},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// JSON schema every generated decision must follow.
/// Changing this text changes `schema_hash` on all new artifacts.
pub const DECISION_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["price", "quality", "marketing", "reasoning"],
  "properties": {
    "price":     { "type": "number",  "minimum": 0.5, "maximum": 10.0 },
    "quality":   { "type": "integer", "minimum": 1,   "maximum": 10 },
    "marketing": { "type": "integer", "minimum": 0,   "maximum": 100 },
    "reasoning": { "type": "string",  "maxLength": 500 }
  }
}"#;

/// A competitor decision visible to the acting agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorView {
    pub agent_id:     AgentId,
    pub model_id:     String,
    pub price:        f64,
    pub quality:      u32,
    pub marketing:    u32,
    /// True when the decision is from this tick (sequential mode),
    /// false when it comes from the previous tick.
    pub current_step: bool,
}

/// One agent's result in the previous tick's market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketShareView {
    pub agent_id:     AgentId,
    pub model_id:     String,
    pub customers:    u32,
    pub revenue:      f64,
    pub market_share: f64,
}

/// What the acting agent earned last tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeView {
    pub customers: u32,
    pub revenue:   f64,
}

/// Everything a prompt may depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    pub simulation_id:     String,
    pub agent_id:          AgentId,
    pub model_id:          String,
    pub strategy_hints:    Option<String>,
    pub day_number:        DayNumber,
    pub hour:              Hour,
    pub environment:       EnvironmentSnapshot,
    pub tick:              TickSnapshot,
    pub previous_decision: Option<Decision>,
    pub previous_outcome:  Option<OutcomeView>,
    pub competitors:       Vec<CompetitorView>,
    pub last_market:       Vec<MarketShareView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltPrompt {
    pub text:        String,
    pub prompt_hash: String,
    pub schema_hash: String,
}

pub trait PromptBuilder: Send + Sync {
    fn build(&self, ctx: &PromptContext) -> BuiltPrompt;
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn schema_hash() -> String {
    sha256_hex(DECISION_SCHEMA.as_bytes())
}

/// Plain-text prompt used by default.
#[derive(Debug, Clone, Default)]
pub struct StandardPromptBuilder;

impl PromptBuilder for StandardPromptBuilder {
    fn build(&self, ctx: &PromptContext) -> BuiltPrompt {
        let text = render(ctx);
        BuiltPrompt {
            prompt_hash: sha256_hex(text.as_bytes()),
            schema_hash: schema_hash(),
            text,
        }
    }
}

// `write!` into a String cannot fail; results are discarded below.
fn render(ctx: &PromptContext) -> String {
    let mut out = String::new();
    let env = &ctx.environment;

    let _ = writeln!(
        out,
        "You run a lemonade stand competing against other stands on the same street."
    );
    let _ = writeln!(out, "Model: {}", ctx.model_id);
    if let Some(hints) = &ctx.strategy_hints {
        let _ = writeln!(out, "Strategy hints: {hints}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Conditions: day {}, {:02}:00", ctx.day_number, ctx.hour);
    let _ = writeln!(
        out,
        "Weather: {}, {}°F. Base demand: {} customers.",
        env.weather.as_str(),
        env.temperature,
        env.base_demand
    );
    if let Some(event) = &env.special_event {
        let _ = writeln!(out, "Special event today: {event}.");
    }
    let _ = write!(out, "Hourly demand multiplier: {:.2}", ctx.tick.demand_multiplier);
    match &ctx.tick.event {
        Some(label) => {
            let _ = writeln!(out, " ({label}).");
        }
        None => {
            let _ = writeln!(out, ".");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Your last decision");
    match &ctx.previous_decision {
        Some(d) => {
            let _ = writeln!(
                out,
                "price ${:.2}, quality {}, marketing {}",
                d.price, d.quality, d.marketing
            );
            if let Some(o) = &ctx.previous_outcome {
                let _ = writeln!(out, "served {} customers for ${:.2}", o.customers, o.revenue);
            }
        }
        None => {
            let _ = writeln!(out, "none (first hour of trading)");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Competitors");
    if ctx.competitors.is_empty() {
        let _ = writeln!(out, "no competitor decisions visible yet");
    }
    for c in &ctx.competitors {
        let when = if c.current_step { "this hour" } else { "last hour" };
        let _ = writeln!(
            out,
            "- {} ({when}): price ${:.2}, quality {}, marketing {}",
            c.model_id, c.price, c.quality, c.marketing
        );
    }

    if !ctx.last_market.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Last hour's market");
        for m in &ctx.last_market {
            let _ = writeln!(
                out,
                "- {}: {} customers, ${:.2} revenue, {:.1}% share",
                m.model_id,
                m.customers,
                m.revenue,
                m.market_share * 100.0
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Your move");
    let _ = writeln!(
        out,
        "Choose price ({MIN_PRICE:.2}-{MAX_PRICE:.2}), quality ({MIN_QUALITY}-{MAX_QUALITY}), \
         marketing ({MIN_MARKETING}-{MAX_MARKETING}) and explain in at most \
         {MAX_REASONING_CHARS} characters."
    );
    let _ = writeln!(out, "Respond with a single JSON object matching this schema:");
    out.push_str(DECISION_SCHEMA);
    out.push('\n');
    out
}
