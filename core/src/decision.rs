//! Decision validation: everything a model returns is untrusted.
//!
//! Two paths:
//!   - Strict: every field present, typed and in range. Only the
//!     reasoning text is cleaned.
//!   - Lenient: at least one numeric field can be coerced. Present
//!     fields are clamped, missing fields take the fixed defaults, and
//!     the result is flagged `was_coerced`.
//! Anything else is a validation failure and the caller retries or
//! falls back.

use crate::types::{AgentId, DayNumber, DecisionId, Hour, TickId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MIN_PRICE: f64 = 0.50;
pub const MAX_PRICE: f64 = 10.00;
pub const MIN_QUALITY: u32 = 1;
pub const MAX_QUALITY: u32 = 10;
pub const MIN_MARKETING: u32 = 0;
pub const MAX_MARKETING: u32 = 100;
pub const MAX_REASONING_CHARS: usize = 500;

pub const DEFAULT_PRICE: f64 = 2.00;
pub const DEFAULT_QUALITY: u32 = 5;
pub const DEFAULT_MARKETING: u32 = 50;

pub const FALLBACK_PREVIOUS_NOTICE: &str =
    "[fallback] Decision generation failed; repeating the previous decision.";
pub const FALLBACK_DEFAULT_NOTICE: &str =
    "[fallback] Decision generation failed; using default decision.";
const MISSING_REASONING: &str = "No reasoning provided.";

/// Leading chain-of-thought phrasing stripped from reasoning.
/// Longer phrases first so "let me think about this" wins over "let me think".
const THINKING_PREFIXES: &[&str] = &[
    "<thinking>",
    "let me think step by step",
    "let me think about this",
    "let me think",
    "let me analyze this",
    "let me analyze",
    "let me consider",
    "let's think step by step",
    "let's think",
    "thinking:",
    "okay, so",
    "ok, so",
    "alright,",
    "hmm,",
    "step 1:",
    "firstly,",
    "first,",
];

/// An agent's choice for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub price:     f64,
    pub quality:   u32,
    pub marketing: u32,
    pub reasoning: String,
}

impl Decision {
    pub fn defaults(reasoning: impl Into<String>) -> Self {
        Self {
            price:     DEFAULT_PRICE,
            quality:   DEFAULT_QUALITY,
            marketing: DEFAULT_MARKETING,
            reasoning: reasoning.into(),
        }
    }
}

/// Row from the `agent_decision` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id:   DecisionId,
    pub simulation_id: String,
    pub agent_id:      AgentId,
    pub tick_id:       TickId,
    pub day_number:    DayNumber,
    pub hour:          Hour,
    pub price:         f64,
    pub quality:       u32,
    pub marketing:     u32,
    pub reasoning:     String,
}

impl DecisionRecord {
    pub fn decision(&self) -> Decision {
        Decision {
            price:     self.price,
            quality:   self.quality,
            marketing: self.marketing,
            reasoning: self.reasoning.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDecision {
    pub decision:    Decision,
    pub was_coerced: bool,
    /// Human-readable notes on each coercion applied.
    pub adjustments: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response JSON is not an object")]
    NotAnObject,

    #[error("no usable numeric field (price, quality, marketing)")]
    NoUsableFields,
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse raw model output: take the outermost JSON object (ignoring code
/// fences or prose around it) and validate it.
pub fn parse_decision_text(raw: &str) -> Result<ValidatedDecision, DecisionError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => return Err(DecisionError::NotJson("no JSON object found".into())),
    };
    let value: Value =
        serde_json::from_str(body).map_err(|e| DecisionError::NotJson(e.to_string()))?;
    validate_decision(&value)
}

/// Validate an already-parsed candidate.
pub fn validate_decision(value: &Value) -> Result<ValidatedDecision, DecisionError> {
    let obj = value.as_object().ok_or(DecisionError::NotAnObject)?;

    if let Some(decision) = strict(obj) {
        return Ok(ValidatedDecision {
            decision,
            was_coerced: false,
            adjustments: Vec::new(),
        });
    }
    lenient(obj)
}

fn strict(obj: &serde_json::Map<String, Value>) -> Option<Decision> {
    let price = obj.get("price")?.as_f64().filter(|p| p.is_finite())?;
    if !(MIN_PRICE..=MAX_PRICE).contains(&price) {
        return None;
    }
    let quality = strict_integer(obj.get("quality")?)?;
    if !(MIN_QUALITY as i64..=MAX_QUALITY as i64).contains(&quality) {
        return None;
    }
    let marketing = strict_integer(obj.get("marketing")?)?;
    if !(MIN_MARKETING as i64..=MAX_MARKETING as i64).contains(&marketing) {
        return None;
    }
    let reasoning = obj.get("reasoning")?.as_str()?;
    if reasoning.chars().count() > MAX_REASONING_CHARS {
        return None;
    }
    Some(Decision {
        price,
        quality: quality as u32,
        marketing: marketing as u32,
        reasoning: clean_reasoning(reasoning),
    })
}

/// JSON integers, or floats with no fractional part.
fn strict_integer(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    let f = v.as_f64()?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

fn lenient(obj: &serde_json::Map<String, Value>) -> Result<ValidatedDecision, DecisionError> {
    let price = obj.get("price").and_then(coerce_number);
    let quality = obj.get("quality").and_then(coerce_number);
    let marketing = obj.get("marketing").and_then(coerce_number);
    if price.is_none() && quality.is_none() && marketing.is_none() {
        return Err(DecisionError::NoUsableFields);
    }

    let mut adjustments = Vec::new();

    let price = match price {
        Some(p) => {
            let clamped = p.clamp(MIN_PRICE, MAX_PRICE);
            if clamped != p {
                adjustments.push(format!("price {p} clamped to {clamped:.2}"));
            }
            clamped
        }
        None => {
            adjustments.push(format!("price missing, default {DEFAULT_PRICE:.2}"));
            DEFAULT_PRICE
        }
    };
    let quality = coerce_bounded("quality", quality, MIN_QUALITY, MAX_QUALITY, DEFAULT_QUALITY, &mut adjustments);
    let marketing = coerce_bounded(
        "marketing",
        marketing,
        MIN_MARKETING,
        MAX_MARKETING,
        DEFAULT_MARKETING,
        &mut adjustments,
    );

    let reasoning = match obj.get("reasoning").and_then(Value::as_str) {
        Some(r) => {
            if r.chars().count() > MAX_REASONING_CHARS {
                adjustments.push("reasoning truncated".into());
            }
            clean_reasoning(r)
        }
        None => {
            adjustments.push("reasoning missing".into());
            MISSING_REASONING.to_string()
        }
    };

    Ok(ValidatedDecision {
        decision: Decision {
            price,
            quality,
            marketing,
            reasoning,
        },
        was_coerced: true,
        adjustments,
    })
}

fn coerce_bounded(
    field: &str,
    value: Option<f64>,
    min: u32,
    max: u32,
    default: u32,
    adjustments: &mut Vec<String>,
) -> u32 {
    match value {
        Some(v) => {
            let clamped = v.round().clamp(min as f64, max as f64);
            if clamped != v {
                adjustments.push(format!("{field} {v} coerced to {clamped}"));
            }
            clamped as u32
        }
        None => {
            adjustments.push(format!("{field} missing, default {default}"));
            default
        }
    }
}

/// Numbers, or strings that parse as numbers ("2.50", "$3").
fn coerce_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

// ── Reasoning cleanup ────────────────────────────────────────────────────────

/// Strip leading chain-of-thought phrasing, then enforce the length limit.
pub fn clean_reasoning(text: &str) -> String {
    let mut rest = text.trim();
    loop {
        let before = rest.len();
        for prefix in THINKING_PREFIXES {
            if starts_with_ignore_ascii_case(rest, prefix) {
                rest = rest[prefix.len()..]
                    .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | ':' | ';' | '-' | '…'));
                break;
            }
        }
        if rest.len() == before {
            break;
        }
    }
    truncate_reasoning(rest)
}

fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Hard limit on characters. Prefer cutting at a sentence end in the
/// second half of the allowed window; otherwise cut and add "...".
pub fn truncate_reasoning(text: &str) -> String {
    if text.chars().count() <= MAX_REASONING_CHARS {
        return text.to_string();
    }
    let window: String = text.chars().take(MAX_REASONING_CHARS).collect();
    let sentence_end = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .last();
    if let Some(end) = sentence_end {
        if window[..end].chars().count() >= MAX_REASONING_CHARS / 2 {
            return window[..end].to_string();
        }
    }
    let head: String = text.chars().take(MAX_REASONING_CHARS - 3).collect();
    format!("{}...", head.trim_end())
}

// ── Fallback ─────────────────────────────────────────────────────────────────

/// The decision used when no attempt produced a usable candidate:
/// the agent's previous decision with a fixed notice, or the defaults.
pub fn fallback_decision(previous: Option<&Decision>) -> Decision {
    match previous {
        Some(prev) => Decision {
            price:     prev.price,
            quality:   prev.quality,
            marketing: prev.marketing,
            reasoning: FALLBACK_PREVIOUS_NOTICE.to_string(),
        },
        None => Decision::defaults(FALLBACK_DEFAULT_NOTICE),
    }
}

/// Whether persisted reasoning is one of the fixed fallback notices.
pub fn is_fallback_reasoning(reasoning: &str) -> bool {
    reasoning == FALLBACK_PREVIOUS_NOTICE || reasoning == FALLBACK_DEFAULT_NOTICE
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_candidate_passes_unchanged() {
        let v = validate_decision(&json!({
            "price": 2.5, "quality": 7, "marketing": 40, "reasoning": "Hot day, raise price."
        }))
        .unwrap();
        assert!(!v.was_coerced);
        assert_eq!(v.decision.price, 2.5);
        assert_eq!(v.decision.quality, 7);
        assert_eq!(v.decision.marketing, 40);
        assert_eq!(v.decision.reasoning, "Hot day, raise price.");
    }

    #[test]
    fn integral_float_quality_is_strict() {
        let v = validate_decision(&json!({
            "price": 1.0, "quality": 3.0, "marketing": 0, "reasoning": ""
        }))
        .unwrap();
        assert!(!v.was_coerced);
        assert_eq!(v.decision.quality, 3);
    }

    #[test]
    fn out_of_range_fields_are_clamped() {
        let v = validate_decision(&json!({
            "price": 25.0, "quality": 0, "marketing": 180, "reasoning": "go big"
        }))
        .unwrap();
        assert!(v.was_coerced);
        assert_eq!(v.decision.price, MAX_PRICE);
        assert_eq!(v.decision.quality, MIN_QUALITY);
        assert_eq!(v.decision.marketing, MAX_MARKETING);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let v = validate_decision(&json!({ "price": "3.25" })).unwrap();
        assert!(v.was_coerced);
        assert_eq!(v.decision.price, 3.25);
        assert_eq!(v.decision.quality, DEFAULT_QUALITY);
        assert_eq!(v.decision.marketing, DEFAULT_MARKETING);
        assert_eq!(v.decision.reasoning, MISSING_REASONING);
    }

    #[test]
    fn no_numeric_field_is_rejected() {
        let err = validate_decision(&json!({ "price": "cheap", "reasoning": "x" })).unwrap_err();
        assert_eq!(err, DecisionError::NoUsableFields);
        assert_eq!(validate_decision(&json!([1, 2])).unwrap_err(), DecisionError::NotAnObject);
    }

    #[test]
    fn parses_json_inside_prose_and_fences() {
        let raw = "Here you go:\n```json\n{\"price\": 1.75, \"quality\": 6, \"marketing\": 20, \"reasoning\": \"steady\"}\n```";
        let v = parse_decision_text(raw).unwrap();
        assert_eq!(v.decision.price, 1.75);
        assert!(matches!(parse_decision_text("no json here"), Err(DecisionError::NotJson(_))));
    }

    #[test]
    fn thinking_prefixes_are_stripped() {
        assert_eq!(clean_reasoning("Let me think about this. Price low."), "Price low.");
        assert_eq!(clean_reasoning("STEP 1: First, undercut rivals"), "undercut rivals");
        assert_eq!(clean_reasoning("Okay, so let me think... sunny day"), "sunny day");
    }

    #[test]
    fn truncation_prefers_sentence_boundary() {
        let sentence = "Prices stay steady today. ";
        let long = sentence.repeat(40);
        let cut = truncate_reasoning(&long);
        assert!(cut.chars().count() <= MAX_REASONING_CHARS);
        assert!(cut.ends_with('.'));
    }

    #[test]
    fn truncation_falls_back_to_ellipsis() {
        let long = "a".repeat(800);
        let cut = truncate_reasoning(&long);
        assert_eq!(cut.chars().count(), MAX_REASONING_CHARS);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn fallback_prefers_previous_decision() {
        let prev = Decision {
            price: 3.0,
            quality: 8,
            marketing: 10,
            reasoning: "old".into(),
        };
        let fb = fallback_decision(Some(&prev));
        assert_eq!((fb.price, fb.quality, fb.marketing), (3.0, 8, 10));
        assert_eq!(fb.reasoning, FALLBACK_PREVIOUS_NOTICE);

        let fb = fallback_decision(None);
        assert_eq!((fb.price, fb.quality, fb.marketing), (DEFAULT_PRICE, DEFAULT_QUALITY, DEFAULT_MARKETING));
    }
}
