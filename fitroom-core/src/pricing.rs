// Per-model token pricing for oracle calls (USD per 1M tokens).
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Token usage reported by an oracle call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build usage from oracle counters; a missing total falls back to input + output.
    pub fn new(input_tokens: u64, output_tokens: u64, total_tokens: Option<u64>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total_tokens
                .filter(|t| *t > 0)
                .unwrap_or(input_tokens + output_tokens),
        }
    }
}

/// Price of one model, per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl ModelRate {
    pub const fn new(input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            input_per_1m,
            output_per_1m,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_1m
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_1m
    }
}

/// A priced oracle call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEvent {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

// Gemini image generation at 1K/2K emits ~1120 output tokens per image, ~2000 at 4K.
const GEMINI_25_FLASH_IMAGE: ModelRate = ModelRate::new(0.10, 0.40);
const GEMINI_3_PRO_IMAGE_PREVIEW: ModelRate = ModelRate::new(1.25, 120.00);
const GEMINI_25_FLASH: ModelRate = ModelRate::new(0.15, 0.60);

static BUILTIN_RATES: OnceLock<RateTable> = OnceLock::new();

/// Model name → rate. Adding a model is a pure data change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    rates: HashMap<String, ModelRate>,
}

impl RateTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in Gemini rate table.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.insert("gemini-2.5-flash-image", GEMINI_25_FLASH_IMAGE);
        table.insert("gemini-3-pro-image-preview", GEMINI_3_PRO_IMAGE_PREVIEW);
        table.insert("gemini-2.5-flash", GEMINI_25_FLASH);
        table
    }

    /// Process-wide built-in table.
    pub fn global() -> &'static RateTable {
        BUILTIN_RATES.get_or_init(Self::builtin)
    }

    pub fn insert(&mut self, model: &str, rate: ModelRate) {
        self.rates.insert(model.to_string(), rate);
    }

    pub fn get(&self, model: &str) -> Option<ModelRate> {
        self.rates.get(model).copied()
    }

    pub fn models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Cost in USD. Unknown models cost 0 and log a warning; pricing gaps
    /// never block a result.
    pub fn calculate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.get(model) {
            Some(rate) => rate.cost(input_tokens, output_tokens),
            None => {
                warn!(model, "Unknown model in rate table, recording zero cost");
                0.0
            }
        }
    }

    /// Price one call.
    pub fn price(&self, model: &str, usage: TokenUsage) -> CostEvent {
        CostEvent {
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            cost_usd: self.calculate_cost(model, usage.input_tokens, usage.output_tokens),
        }
    }
}

/// Cost in USD using the built-in table.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    RateTable::global().calculate_cost(model, input_tokens, output_tokens)
}
