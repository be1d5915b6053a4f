//! C1: Pricing. Canonicalizes model names via an alias graph and computes USD
//! cost from token counts; cached with a TTL in front of the document-store
//! catalogue (spec.md §4.1).

pub mod catalogue;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingSource {
    Catalogue,
    BedrockMatch,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRate {
    pub canonical_model: String,
    pub provider: String,
    pub input_per_mtok: Decimal,
    pub output_per_mtok: Decimal,
    pub cached_per_mtok: Decimal,
    pub aliases: Vec<String>,
    pub source: PricingSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub input_per_mtok: Decimal,
    pub output_per_mtok: Decimal,
    pub cached_per_mtok: Decimal,
    pub canonical_model: String,
    pub provider: String,
    pub source: PricingSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total: Decimal,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub cached_cost: Decimal,
    pub pricing: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationOption {
    pub model: String,
    pub label: String,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub avg_cost: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DegradationTargets {
    pub providers: Vec<String>,
    pub models: HashMap<String, Vec<DegradationOption>>,
}

/// Document-store collaborator: pulls the current pricing catalogue. Population
/// of that data source is out of scope (spec.md §1); only the read path lives
/// here.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ModelRate>>;
}

/// A source that never has fresher data than the compiled-in default; useful
/// for tests and for standalone deployments without a document store.
pub struct StaticCatalogueSource;

#[async_trait]
impl CatalogueSource for StaticCatalogueSource {
    async fn load(&self) -> Result<Vec<ModelRate>> {
        Ok(catalogue::default_catalogue())
    }
}

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Cache {
    models: HashMap<String, ModelRate>,
    aliases: HashMap<String, String>,
    loaded_at: Instant,
}

/// In-memory pricing engine with a TTL cache in front of a pluggable
/// `CatalogueSource` (§4.1).
pub struct PricingEngine {
    source: Arc<dyn CatalogueSource>,
    ttl: Duration,
    cache: RwLock<Cache>,
}

impl PricingEngine {
    pub fn new(source: Arc<dyn CatalogueSource>) -> Self {
        let (models, aliases) = build_maps(catalogue::default_catalogue());
        Self {
            source,
            ttl: DEFAULT_TTL,
            cache: RwLock::new(Cache {
                models,
                aliases,
                // Force a reload attempt on first real use.
                loaded_at: Instant::now() - DEFAULT_TTL - Duration::from_secs(1),
            }),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Reload invalidates both the model map and the alias map atomically
    /// (§4.1). On failure the existing cache is kept and a default fallback is
    /// only installed if the cache was never populated.
    #[instrument(skip(self))]
    pub async fn ensure_fresh(&self) {
        let stale = {
            let cache = self.cache.read().await;
            cache.loaded_at.elapsed() >= self.ttl
        };
        if !stale {
            return;
        }
        match self.source.load().await {
            Ok(rates) => {
                let (models, aliases) = build_maps(rates);
                let mut cache = self.cache.write().await;
                cache.models = models;
                cache.aliases = aliases;
                cache.loaded_at = Instant::now();
            }
            Err(err) => {
                warn!(error = %err, "pricing catalogue reload failed, keeping cached rates");
                let mut cache = self.cache.write().await;
                cache.loaded_at = Instant::now();
            }
        }
    }

    /// O(1) direct/alias lookup, falling back to prefix matching against
    /// canonical names and aliases; returns the lowercased input if nothing
    /// resolves (§4.1).
    pub async fn resolve(&self, model: &str) -> String {
        self.ensure_fresh().await;
        let needle = model.to_lowercase();
        let cache = self.cache.read().await;
        if cache.models.contains_key(&needle) {
            return needle;
        }
        if let Some(canonical) = cache.aliases.get(&needle) {
            return canonical.clone();
        }
        for (canonical, rate) in cache.models.iter() {
            if canonical.starts_with(&needle) || needle.starts_with(canonical.as_str()) {
                return canonical.clone();
            }
            if rate.aliases.iter().any(|a| a == &needle) {
                return canonical.clone();
            }
        }
        needle
    }

    #[instrument(skip(self))]
    pub async fn quote(&self, model: &str, provider: Option<&str>) -> Quote {
        self.ensure_fresh().await;
        let needle = model.to_lowercase();
        let cache = self.cache.read().await;

        if let Some(rate) = lookup_direct(&cache, &needle) {
            return quote_from_rate(rate);
        }

        if is_bedrock_like(provider) {
            if let Some(rate) = lookup_bedrock_cross_prefix(&cache, &needle) {
                let mut quote = quote_from_rate(rate);
                quote.source = PricingSource::BedrockMatch;
                return quote;
            }
        }

        for (canonical, rate) in cache.models.iter() {
            if canonical.starts_with(&needle) || needle.starts_with(canonical.as_str()) {
                return quote_from_rate(rate);
            }
        }

        let default = catalogue::default_rate(&needle);
        quote_from_rate(&default)
    }

    #[instrument(skip(self))]
    pub async fn cost(&self, model: &str, input: u64, output: u64, cached: u64) -> CostBreakdown {
        let quote = self.quote(model, None).await;
        self.cost_with_quote(&quote, input, output, cached)
    }

    /// `Cost({model, input, output, cached})` per §4.1 and the §8 invariant:
    /// `total = (max(0, in-cached)/1e6)*input_rate + (out/1e6)*output_rate +
    /// (cached/1e6)*cached_rate`.
    pub fn cost_with_quote(&self, quote: &Quote, input: u64, output: u64, cached: u64) -> CostBreakdown {
        let million = Decimal::from(1_000_000u64);
        let non_cached_input = input.saturating_sub(cached);
        let input_cost = Decimal::from(non_cached_input) / million * quote.input_per_mtok;
        let output_cost = Decimal::from(output) / million * quote.output_per_mtok;
        let cached_cost = Decimal::from(cached) / million * quote.cached_per_mtok;
        CostBreakdown {
            total: input_cost + output_cost + cached_cost,
            input_cost,
            output_cost,
            cached_cost,
            pricing: quote.clone(),
        }
    }

    /// Group canonical models by provider, sorted by `(input+output)/2`
    /// ascending (§4.1), for populating SDK-facing degrade-to-model pickers.
    pub async fn degradation_targets(&self) -> DegradationTargets {
        self.ensure_fresh().await;
        let cache = self.cache.read().await;
        let mut by_provider: HashMap<String, Vec<DegradationOption>> = HashMap::new();
        for rate in cache.models.values() {
            let avg = (rate.input_per_mtok + rate.output_per_mtok) / Decimal::from(2);
            by_provider
                .entry(rate.provider.clone())
                .or_default()
                .push(DegradationOption {
                    model: rate.canonical_model.clone(),
                    label: rate.canonical_model.clone(),
                    input_cost: rate.input_per_mtok,
                    output_cost: rate.output_per_mtok,
                    avg_cost: avg,
                });
        }
        for options in by_provider.values_mut() {
            options.sort_by(|a, b| a.avg_cost.cmp(&b.avg_cost));
        }
        let mut providers: Vec<String> = by_provider.keys().cloned().collect();
        providers.sort();
        DegradationTargets {
            providers,
            models: by_provider,
        }
    }
}

fn build_maps(rates: Vec<ModelRate>) -> (HashMap<String, ModelRate>, HashMap<String, String>) {
    let mut models = HashMap::new();
    let mut aliases = HashMap::new();
    for rate in rates {
        for alias in &rate.aliases {
            aliases.insert(alias.to_lowercase(), rate.canonical_model.clone());
        }
        models.insert(rate.canonical_model.clone(), rate);
    }
    (models, aliases)
}

fn lookup_direct<'a>(cache: &'a Cache, needle: &str) -> Option<&'a ModelRate> {
    if let Some(rate) = cache.models.get(needle) {
        return Some(rate);
    }
    cache
        .aliases
        .get(needle)
        .and_then(|canonical| cache.models.get(canonical))
}

fn quote_from_rate(rate: &ModelRate) -> Quote {
    Quote {
        input_per_mtok: rate.input_per_mtok,
        output_per_mtok: rate.output_per_mtok,
        cached_per_mtok: rate.cached_per_mtok,
        canonical_model: rate.canonical_model.clone(),
        provider: rate.provider.clone(),
        source: rate.source,
    }
}

fn is_bedrock_like(provider: Option<&str>) -> bool {
    matches!(provider.map(str::to_lowercase).as_deref(), Some("bedrock") | Some("aws"))
}

/// Strip Bedrock vendor prefixes (`anthropic.`, `us.anthropic.`, `amazon.`,
/// `meta.`) and version suffixes (`-v2:0`) before matching against base model
/// names, per §4.1.
fn lookup_bedrock_cross_prefix<'a>(cache: &'a Cache, needle: &str) -> Option<&'a ModelRate> {
    let stripped = strip_bedrock_prefix(needle);
    cache.models.iter().find_map(|(canonical, rate)| {
        (canonical.contains(stripped.as_str()) || stripped.contains(canonical.as_str()))
            .then_some(rate)
    })
}

fn strip_bedrock_prefix(model: &str) -> String {
    let without_vendor = model
        .strip_prefix("us.anthropic.")
        .or_else(|| model.strip_prefix("anthropic."))
        .or_else(|| model.strip_prefix("amazon."))
        .or_else(|| model.strip_prefix("meta."))
        .unwrap_or(model);
    match without_vendor.rfind("-v") {
        Some(idx) => without_vendor[..idx].to_string(),
        None => without_vendor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> PricingEngine {
        PricingEngine::new(Arc::new(StaticCatalogueSource))
    }

    #[tokio::test]
    async fn resolves_known_model_directly() {
        let e = engine();
        assert_eq!(e.resolve("gpt-4o").await, "gpt-4o");
    }

    #[tokio::test]
    async fn resolves_alias() {
        let e = engine();
        assert_eq!(e.resolve("GPT4O").await, "gpt-4o");
    }

    #[tokio::test]
    async fn resolves_unknown_to_lowercased_input() {
        let e = engine();
        assert_eq!(e.resolve("some-custom-model").await, "some-custom-model");
    }

    #[tokio::test]
    async fn bedrock_cross_prefix_matches_base_model() {
        let e = engine();
        let quote = e
            .quote("us.anthropic.claude-3-5-sonnet-20241022-v2:0", Some("bedrock"))
            .await;
        assert_eq!(quote.source, PricingSource::BedrockMatch);
        assert_eq!(quote.canonical_model, "claude-3-5-sonnet");
    }

    #[tokio::test]
    async fn unknown_model_yields_default_source() {
        let e = engine();
        let quote = e.quote("totally-unknown-model-xyz", None).await;
        assert_eq!(quote.source, PricingSource::Default);
    }

    #[tokio::test]
    async fn cost_matches_invariant_formula() {
        let e = engine();
        let breakdown = e.cost("gpt-4o-mini", 1000, 500, 200).await;
        // input rate 0.15/Mtok, output 0.60/Mtok, cached 0.075/Mtok
        let expected_input = Decimal::from(800u64) / Decimal::from(1_000_000u64) * dec!(0.15);
        let expected_output = Decimal::from(500u64) / Decimal::from(1_000_000u64) * dec!(0.60);
        let expected_cached = Decimal::from(200u64) / Decimal::from(1_000_000u64) * dec!(0.075);
        assert_eq!(breakdown.input_cost, expected_input);
        assert_eq!(breakdown.output_cost, expected_output);
        assert_eq!(breakdown.cached_cost, expected_cached);
        assert_eq!(breakdown.total, expected_input + expected_output + expected_cached);
    }

    #[tokio::test]
    async fn cost_never_double_counts_cached_as_noncached_input() {
        let e = engine();
        // cached > input should not underflow / go negative.
        let breakdown = e.cost("gpt-4o", 100, 0, 100).await;
        assert_eq!(breakdown.input_cost, Decimal::ZERO);
    }

    #[tokio::test]
    async fn degradation_targets_sorted_ascending_by_avg_cost() {
        let e = engine();
        let targets = e.degradation_targets().await;
        let openai = &targets.models["openai"];
        for pair in openai.windows(2) {
            assert!(pair[0].avg_cost <= pair[1].avg_cost);
        }
    }
}
