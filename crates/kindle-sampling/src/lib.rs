//! # kindle-sampling
//!
//! Decoding policies handed to the inference engine with every generation.
//!
//! A policy starts life as loose [`SamplingParams`] (deserializable, builder
//! style) and becomes an immutable [`SamplingConfig`] once validated:
//! - `max_tokens > 0`
//! - `temperature >= 0` (0.0 = greedy)
//! - `0 < top_p <= 1`
//! - `top_k >= 0` (0 = disabled)
//! - `repetition_penalty > 0` (1.0 = none)
//!
//! Two presets are provided: [`SamplingConfig::warmup`] for the engine
//! self-test run during initialization, and [`SamplingConfig::conversation`]
//! for user-facing answers.

use serde::{Deserialize, Serialize};

/// A sampling field violated its constraint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("max_tokens must be > 0")]
    InvalidMaxTokens,
    #[error("temperature must be a finite value >= 0 (got {0})")]
    InvalidTemperature(f32),
    #[error("top_p must be in (0, 1] (got {0})")]
    InvalidTopP(f32),
    #[error("repetition_penalty must be a finite value > 0 (got {0})")]
    InvalidRepetitionPenalty(f32),
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Unvalidated sampling fields.
///
/// Fields missing from a deserialized document take the conversation
/// defaults. Call [`SamplingParams::validate`] to obtain a [`SamplingConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Maximum number of tokens the engine may generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Softmax temperature. 0.0 selects greedy decoding.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling mass. 1.0 = disabled.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Restrict sampling to the K most likely tokens. 0 = disabled.
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Values > 1.0 discourage repetition.
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    /// Ask the engine for incremental fragments instead of cumulative text.
    #[serde(default = "default_delta_mode")]
    pub delta_mode: bool,
}

fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.5
}
fn default_top_p() -> f32 {
    0.85
}
fn default_top_k() -> u32 {
    25
}
fn default_repetition_penalty() -> f32 {
    1.1
}
fn default_delta_mode() -> bool {
    true
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            repetition_penalty: default_repetition_penalty(),
            delta_mode: default_delta_mode(),
        }
    }
}

impl SamplingParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn with_top_k(mut self, k: u32) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    pub fn with_delta_mode(mut self, delta: bool) -> Self {
        self.delta_mode = delta;
        self
    }

    /// Check every constraint and freeze the fields into a [`SamplingConfig`].
    pub fn validate(self) -> SamplingResult<SamplingConfig> {
        if self.max_tokens == 0 {
            return Err(SamplingError::InvalidMaxTokens);
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SamplingError::InvalidTemperature(self.temperature));
        }
        // NaN fails both comparisons and lands here too.
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(SamplingError::InvalidTopP(self.top_p));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return Err(SamplingError::InvalidRepetitionPenalty(
                self.repetition_penalty,
            ));
        }
        Ok(SamplingConfig { params: self })
    }
}

/// A validated, immutable decoding policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SamplingConfig {
    params: SamplingParams,
}

impl SamplingConfig {
    /// Single deterministic token. Used only to exercise a freshly built
    /// engine before it is declared ready.
    pub fn warmup() -> Self {
        Self {
            params: SamplingParams {
                max_tokens: 1,
                temperature: 0.0,
                top_p: 1.0,
                top_k: 0,
                repetition_penalty: 1.0,
                delta_mode: false,
            },
        }
    }

    /// Policy for user-facing answers, streamed as deltas.
    pub fn conversation() -> Self {
        Self {
            params: SamplingParams::default(),
        }
    }

    pub fn max_tokens(&self) -> u32 {
        self.params.max_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.params.temperature
    }

    pub fn top_p(&self) -> f32 {
        self.params.top_p
    }

    pub fn top_k(&self) -> u32 {
        self.params.top_k
    }

    pub fn repetition_penalty(&self) -> f32 {
        self.params.repetition_penalty
    }

    pub fn delta_mode(&self) -> bool {
        self.params.delta_mode
    }

    /// True when decoding is fully deterministic (greedy).
    pub fn is_greedy(&self) -> bool {
        self.params.temperature == 0.0
    }

    /// Copy the fields back out, e.g. to derive a modified policy.
    pub fn params(&self) -> SamplingParams {
        self.params.clone()
    }
}

impl TryFrom<SamplingParams> for SamplingConfig {
    type Error = SamplingError;

    fn try_from(params: SamplingParams) -> SamplingResult<Self> {
        params.validate()
    }
}
