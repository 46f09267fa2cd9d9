use serde::{Deserialize, Serialize};

use crate::error::GenerateError;

/// Decoding parameters for one `generate` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Upper bound on the number of generated tokens.
    pub max_steps: usize,
    /// Logits are divided by this before the softmax. Smaller is sharper.
    pub temperature: f32,
    /// Number of highest-scoring candidates kept before sampling.
    pub top_k: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_steps: 100,
            temperature: 0.7,
            top_k: 50,
        }
    }
}

impl SamplingParams {
    pub fn new(max_steps: usize, temperature: f32, top_k: usize) -> Self {
        Self {
            max_steps,
            temperature,
            top_k,
        }
    }

    /// Check the hard constraints the decoder relies on.
    pub fn validate(&self) -> Result<(), GenerateError> {
        if self.max_steps == 0 {
            return Err(GenerateError::InvalidParams(
                "max_steps must be at least 1".into(),
            ));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(GenerateError::InvalidParams(format!(
                "temperature must be a positive finite number, got {}",
                self.temperature
            )));
        }
        if self.top_k == 0 {
            return Err(GenerateError::InvalidParams(
                "top_k must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `top_k` clamped to the vocabulary size.
    pub fn effective_top_k(&self, vocab_size: usize) -> usize {
        self.top_k.min(vocab_size)
    }
}
