//! The external decision-generation capability.
//!
//! Implementations only turn a prompt into raw text. Retries, validation
//! and fallback belong to the agent-turn orchestrator.

use crate::{error::GenerationError, prompt::sha256_hex};
use async_trait::async_trait;

#[async_trait]
pub trait DecisionGenerator: Send + Sync + 'static {
    /// Generate raw (untrusted) text for `prompt` with the given model.
    async fn generate(&self, model_id: &str, prompt: &str) -> Result<String, GenerationError>;
}

/// Offline generator for headless runs.
///
/// Derives a decision from a digest of (model id, prompt), so identical
/// prompts always produce identical output and no network is needed.
#[derive(Debug, Clone, Default)]
pub struct HeuristicGenerator;

#[async_trait]
impl DecisionGenerator for HeuristicGenerator {
    async fn generate(&self, model_id: &str, prompt: &str) -> Result<String, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        let digest = sha256_hex(format!("{model_id}\n{prompt}").as_bytes());
        let byte = |i: usize| u8::from_str_radix(&digest[i * 2..i * 2 + 2], 16).unwrap_or(0) as u32;

        // price 1.00..=4.00 in 5-cent steps
        let price = 1.0 + (byte(0) % 61) as f64 * 0.05;
        let quality = 1 + byte(1) % 10;
        let marketing = (byte(2) * 100) / 255;

        let reasoning = if prompt.contains("lunch_rush") {
            "Lunch crowd expected, leaning on marketing."
        } else if price < 2.0 {
            "Keeping the price low to win volume."
        } else {
            "Holding a steady mid-market position."
        };

        Ok(serde_json::json!({
            "price": (price * 100.0).round() / 100.0,
            "quality": quality,
            "marketing": marketing,
            "reasoning": reasoning,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::parse_decision_text;

    #[tokio::test]
    async fn heuristic_output_is_deterministic_and_valid() {
        let g = HeuristicGenerator;
        let a = g.generate("model-alpha", "some prompt").await.unwrap();
        let b = g.generate("model-alpha", "some prompt").await.unwrap();
        assert_eq!(a, b);

        let v = parse_decision_text(&a).unwrap();
        assert!(!v.was_coerced, "heuristic output should pass strict validation: {a}");
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let err = HeuristicGenerator.generate("m", "  ").await.unwrap_err();
        assert_eq!(err, GenerationError::EmptyResponse);
    }
}
