use std::error::Error;
use serde::{Deserialize, Serialize};

use crate::llm::error::InferenceError;

/// Sampling controls for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Softmax temperature, must be > 0
    pub temperature: f32,
    /// Nucleus sampling threshold in (0, 1]
    pub top_p: f32,
    /// Upper bound on generated tokens per prompt
    pub max_gen_len: usize,
    /// Fixed RNG seed for reproducible sampling
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            max_gen_len: 256,
            seed: None,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), InferenceError> {
        if !(self.temperature > 0.0) || !self.temperature.is_finite() {
            return Err(InferenceError::InvalidArgument(format!(
                "temperature must be > 0, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(InferenceError::InvalidArgument(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.max_gen_len == 0 {
            return Err(InferenceError::InvalidArgument("max_gen_len must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Produces one continuation per prompt, in input order.
pub trait GenerationEngine: Send + Sync {
    fn generate(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;
}
