//! Model-tier routing.
//!
//! A pure function of document size and an optional override, so routing is
//! testable without touching a model.

use lifeproof_core::{ModelTier, PipelineConfig};

/// Rough characters-per-token ratio for English clinical prose.
pub const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(char_count: usize) -> usize {
    char_count / CHARS_PER_TOKEN
}

/// Pick the tier for a document of `char_count` characters.
///
/// An explicit override always wins. Otherwise documents estimated below
/// `token_threshold` tokens go to [`ModelTier::Fast`], the rest escalate.
pub fn select_tier(
    char_count: usize,
    token_threshold: usize,
    override_tier: Option<ModelTier>,
) -> ModelTier {
    if let Some(tier) = override_tier {
        return tier;
    }
    if estimate_tokens(char_count) < token_threshold {
        ModelTier::Fast
    } else {
        ModelTier::Escalated
    }
}

/// Model identifier configured for a tier.
pub fn model_for(config: &PipelineConfig, tier: ModelTier) -> &str {
    match tier {
        ModelTier::Fast => &config.fast_model,
        ModelTier::Escalated => &config.escalated_model,
    }
}
