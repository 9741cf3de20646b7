//! Per-model token pricing.
//!
//! Rates are dollars per million tokens. Models with a long-context tier
//! switch both rates once the input exceeds [`LONG_CONTEXT_THRESHOLD`]
//! tokens.
//!
//! Lookup tries the exact model id, then a table key that prefixes the id
//! (`claude-sonnet-4-20250514` resolves to `claude-sonnet-4`), then an id
//! that prefixes a table key. When a table key prefixes the id, the longest
//! such key wins. When the id only prefixes keys (`gpt-4`), the priciest of
//! those keys wins so a partial id never resolves to cheaper rates.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_types::ModelTier;

use crate::error::TrackerError;

/// One million, the denominator for per-million-token pricing.
const ONE_MILLION: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Input size above which long-context rates apply.
pub const LONG_CONTEXT_THRESHOLD: u64 = 200_000;

/// Rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per million input tokens.
    pub input_per_million: Decimal,
    /// Dollars per million output tokens.
    pub output_per_million: Decimal,
    /// Input rate once input exceeds the long-context threshold.
    #[serde(default)]
    pub long_context_input_per_million: Option<Decimal>,
    /// Output rate once input exceeds the long-context threshold.
    #[serde(default)]
    pub long_context_output_per_million: Option<Decimal>,
    /// Price tier.
    pub tier: ModelTier,
}

impl ModelPricing {
    /// Standard-context pricing with no long-context tier.
    pub const fn new(input_per_million: Decimal, output_per_million: Decimal, tier: ModelTier) -> Self {
        Self {
            input_per_million,
            output_per_million,
            long_context_input_per_million: None,
            long_context_output_per_million: None,
            tier,
        }
    }

    /// Add long-context rates.
    pub const fn with_long_context(mut self, input: Decimal, output: Decimal) -> Self {
        self.long_context_input_per_million = Some(input);
        self.long_context_output_per_million = Some(output);
        self
    }

    /// Rates that apply to a request with `input_tokens` of input.
    pub fn rates_for(&self, input_tokens: u64) -> (Decimal, Decimal) {
        if input_tokens > LONG_CONTEXT_THRESHOLD {
            (
                self.long_context_input_per_million
                    .unwrap_or(self.input_per_million),
                self.long_context_output_per_million
                    .unwrap_or(self.output_per_million),
            )
        } else {
            (self.input_per_million, self.output_per_million)
        }
    }

    /// `input / 1e6 * input_rate + output / 1e6 * output_rate`, without
    /// trailing zeros.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Decimal {
        let (input_rate, output_rate) = self.rates_for(input_tokens);
        let input_cost = Decimal::from(input_tokens)
            .checked_div(ONE_MILLION)
            .and_then(|t| t.checked_mul(input_rate))
            .unwrap_or(Decimal::ZERO);
        let output_cost = Decimal::from(output_tokens)
            .checked_div(ONE_MILLION)
            .and_then(|t| t.checked_mul(output_rate))
            .unwrap_or(Decimal::ZERO);
        input_cost.saturating_add(output_cost).normalize()
    }

    /// Input plus output rate, used to rank models by price.
    pub fn combined_rate(&self) -> Decimal {
        self.input_per_million.saturating_add(self.output_per_million)
    }

    fn validate(&self, model: &str) -> Result<(), TrackerError> {
        let rates = [
            Some(self.input_per_million),
            Some(self.output_per_million),
            self.long_context_input_per_million,
            self.long_context_output_per_million,
        ];
        if rates.into_iter().flatten().any(|r| r.is_sign_negative()) {
            return Err(TrackerError::InvalidPricing {
                model: model.to_owned(),
                reason: String::from("rates must not be negative"),
            });
        }
        Ok(())
    }
}

/// Model id to pricing map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingTable {
    models: BTreeMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let d = Decimal::new;
        let mut models = BTreeMap::new();
        models.insert(
            String::from("claude-opus-4"),
            ModelPricing::new(d(15, 0), d(75, 0), ModelTier::Premium),
        );
        models.insert(
            String::from("claude-sonnet-4"),
            ModelPricing::new(d(3, 0), d(15, 0), ModelTier::Standard)
                .with_long_context(d(6, 0), d(225, 1)),
        );
        models.insert(
            String::from("claude-3-7-sonnet"),
            ModelPricing::new(d(3, 0), d(15, 0), ModelTier::Standard),
        );
        models.insert(
            String::from("claude-3-5-haiku"),
            ModelPricing::new(d(8, 1), d(4, 0), ModelTier::Economy),
        );
        models.insert(
            String::from("claude-haiku-4"),
            ModelPricing::new(d(1, 0), d(5, 0), ModelTier::Economy),
        );
        models.insert(
            String::from("gpt-4o"),
            ModelPricing::new(d(25, 1), d(10, 0), ModelTier::Standard),
        );
        models.insert(
            String::from("gpt-4o-mini"),
            ModelPricing::new(d(15, 2), d(6, 1), ModelTier::Economy),
        );
        Self { models }
    }
}

impl PricingTable {
    /// A table with no models.
    pub const fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    /// Add or replace one model's pricing.
    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) -> Result<(), TrackerError> {
        let model = model.into();
        pricing.validate(&model)?;
        self.models.insert(model, pricing);
        Ok(())
    }

    /// The built-in table with `overrides` applied on top.
    pub fn with_overrides(overrides: &BTreeMap<String, ModelPricing>) -> Result<Self, TrackerError> {
        let mut table = Self::default();
        for (model, pricing) in overrides {
            table.insert(model.clone(), *pricing)?;
        }
        Ok(table)
    }

    /// Number of models known.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Resolve `model` to its table key and pricing.
    ///
    /// When the id is only a prefix of table keys (`gpt-4`), the most
    /// expensive of those keys wins so spend is not under-counted.
    pub fn lookup(&self, model: &str) -> Option<(&str, &ModelPricing)> {
        if let Some((key, pricing)) = self.models.get_key_value(model) {
            return Some((key.as_str(), pricing));
        }
        let key_prefixes_model = self
            .models
            .iter()
            .filter(|(key, _)| model.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len());
        if let Some((key, pricing)) = key_prefixes_model {
            return Some((key.as_str(), pricing));
        }
        self.models
            .iter()
            .filter(|(key, _)| key.starts_with(model))
            .max_by_key(|(_, p)| p.combined_rate())
            .map(|(key, pricing)| (key.as_str(), pricing))
    }

    /// The highest-rate model, used as the fallback for unknown ids and as
    /// the default savings baseline.
    pub fn most_expensive(&self) -> Option<(&str, &ModelPricing)> {
        self.models
            .iter()
            .max_by_key(|(_, p)| p.combined_rate())
            .map(|(key, pricing)| (key.as_str(), pricing))
    }

    /// Cost of a request on `model`.
    ///
    /// Unknown models are priced at the most expensive known rate so spend
    /// is never under-counted. Returns `None` only for an empty table.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Option<Decimal> {
        let pricing = self.resolve(model)?;
        Some(pricing.cost(input_tokens, output_tokens))
    }

    /// Like [`Self::cost`], but an empty table is an error.
    pub fn try_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Result<Decimal, TrackerError> {
        self.cost(model, input_tokens, output_tokens)
            .ok_or_else(|| TrackerError::NoPricing(model.to_owned()))
    }

    /// Pricing for `model`, falling back to the most expensive entry.
    pub fn resolve(&self, model: &str) -> Option<&ModelPricing> {
        if let Some((_, pricing)) = self.lookup(model) {
            return Some(pricing);
        }
        let (fallback, pricing) = self.most_expensive()?;
        tracing::warn!(%model, %fallback, "Unknown model, pricing at the highest known rate");
        Some(pricing)
    }

    /// What the same request would have cost on the most expensive model.
    pub fn baseline_cost(&self, input_tokens: u64, output_tokens: u64) -> Decimal {
        self.most_expensive()
            .map_or(Decimal::ZERO, |(_, p)| p.cost(input_tokens, output_tokens))
    }

    /// All models, sorted by id.
    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelPricing)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn cost_formula_per_million() {
        let pricing = ModelPricing::new(dec!(3), dec!(15), ModelTier::Standard);
        assert_eq!(pricing.cost(100_000, 2_000), dec!(0.33));
    }

    #[test]
    fn long_context_rates_apply_above_threshold() {
        let pricing = ModelPricing::new(dec!(3), dec!(15), ModelTier::Standard)
            .with_long_context(dec!(6), dec!(22.5));
        assert_eq!(pricing.cost(200_000, 0), dec!(0.6));
        assert_eq!(pricing.cost(200_001, 0), dec!(1.200006));
        assert_eq!(pricing.cost(300_000, 1_000_000), dec!(24.3));
    }

    #[test]
    fn lookup_prefers_exact_then_prefix() {
        let table = PricingTable::default();
        assert_eq!(table.lookup("gpt-4o").map(|(k, _)| k), Some("gpt-4o"));
        assert_eq!(table.lookup("gpt-4o-mini-2024-07-18").map(|(k, _)| k), Some("gpt-4o-mini"));
        assert_eq!(
            table.lookup("claude-sonnet-4-20250514").map(|(k, _)| k),
            Some("claude-sonnet-4")
        );
        assert_eq!(table.lookup("claude-opus").map(|(k, _)| k), Some("claude-opus-4"));
        assert!(table.lookup("llama-3").is_none());
    }

    #[test]
    fn partial_id_resolves_to_the_priciest_match() {
        let table = PricingTable::default();
        assert_eq!(table.lookup("gpt-4").map(|(k, _)| k), Some("gpt-4o"));
        assert_eq!(table.lookup("claude").map(|(k, _)| k), Some("claude-opus-4"));
        assert_eq!(table.cost("gpt-4", 1_000_000, 1_000_000), Some(dec!(12.5)));
    }

    #[test]
    fn unknown_model_is_priced_at_the_top_rate() {
        let table = PricingTable::default();
        assert_eq!(table.cost("mystery-model", 1_000_000, 0), Some(dec!(15)));
        assert_eq!(PricingTable::empty().cost("anything", 1, 1), None);
        assert!(matches!(
            PricingTable::empty().try_cost("anything", 1, 1),
            Err(TrackerError::NoPricing(_))
        ));
    }

    #[test]
    fn overrides_replace_builtins() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            String::from("gpt-4o"),
            ModelPricing::new(dec!(2), dec!(8), ModelTier::Standard),
        );
        let table = PricingTable::with_overrides(&overrides).ok();
        let cost = table.and_then(|t| t.cost("gpt-4o", 1_000_000, 1_000_000));
        assert_eq!(cost, Some(dec!(10)));
    }

    #[test]
    fn negative_rates_are_rejected() {
        let mut table = PricingTable::empty();
        let bad = ModelPricing::new(dec!(-1), dec!(1), ModelTier::Economy);
        assert!(table.insert("bad", bad).is_err());
        assert!(table.is_empty());
    }
}
