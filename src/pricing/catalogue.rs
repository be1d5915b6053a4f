//! Compiled-in fallback catalogue, used when the document-store load fails
//! (§4.1). Rates are per-million-token USD, matching `ModelRate`.

use rust_decimal_macros::dec;

use super::{ModelRate, PricingSource};

pub fn default_catalogue() -> Vec<ModelRate> {
    vec![
        ModelRate {
            canonical_model: "gpt-4o".to_string(),
            provider: "openai".to_string(),
            input_per_mtok: dec!(2.50),
            output_per_mtok: dec!(10.00),
            cached_per_mtok: dec!(1.25),
            aliases: vec!["gpt4o".to_string(), "gpt-4o-latest".to_string()],
            source: PricingSource::Catalogue,
        },
        ModelRate {
            canonical_model: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            input_per_mtok: dec!(0.15),
            output_per_mtok: dec!(0.60),
            cached_per_mtok: dec!(0.075),
            aliases: vec!["gpt4o-mini".to_string()],
            source: PricingSource::Catalogue,
        },
        ModelRate {
            canonical_model: "claude-3-5-sonnet".to_string(),
            provider: "anthropic".to_string(),
            input_per_mtok: dec!(3.00),
            output_per_mtok: dec!(15.00),
            cached_per_mtok: dec!(0.30),
            aliases: vec![
                "claude-3.5-sonnet".to_string(),
                "claude-3-5-sonnet-latest".to_string(),
            ],
            source: PricingSource::Catalogue,
        },
        ModelRate {
            canonical_model: "claude-3-haiku".to_string(),
            provider: "anthropic".to_string(),
            input_per_mtok: dec!(0.25),
            output_per_mtok: dec!(1.25),
            cached_per_mtok: dec!(0.03),
            aliases: vec!["claude-3-haiku-20240307".to_string()],
            source: PricingSource::Catalogue,
        },
        ModelRate {
            canonical_model: "anthropic.claude-3-5-sonnet".to_string(),
            provider: "bedrock".to_string(),
            input_per_mtok: dec!(3.00),
            output_per_mtok: dec!(15.00),
            cached_per_mtok: dec!(0.30),
            aliases: vec!["us.anthropic.claude-3-5-sonnet".to_string()],
            source: PricingSource::Catalogue,
        },
        ModelRate {
            canonical_model: "gemini-1.5-pro".to_string(),
            provider: "google".to_string(),
            input_per_mtok: dec!(1.25),
            output_per_mtok: dec!(5.00),
            cached_per_mtok: dec!(0.3125),
            aliases: vec!["gemini-1.5-pro-latest".to_string()],
            source: PricingSource::Catalogue,
        },
    ]
}

/// Conservative rate assigned to a model the catalogue and alias graph both
/// miss (§4.1: "Unknown models yield a conservative default rate").
pub fn default_rate(model: &str) -> ModelRate {
    ModelRate {
        canonical_model: model.to_lowercase(),
        provider: "unknown".to_string(),
        input_per_mtok: dec!(5.00),
        output_per_mtok: dec!(15.00),
        cached_per_mtok: dec!(2.50),
        aliases: Vec::new(),
        source: PricingSource::Default,
    }
}
