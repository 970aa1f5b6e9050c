use std::error::Error;
use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::debug;
use super::error::InferenceError;

/// Maximum sequence length every session is built with
pub const MAX_SEQ_LEN: usize = 2048;
/// Maximum batch size every session is built with
pub const MAX_BATCH_SIZE: usize = 1;

/// Contents of a variant's `params.json`.
///
/// Fields missing from the file take the reference LLaMA defaults. Any field not
/// listed here is rejected, which also stops the file from overriding the fixed
/// sequence length and batch size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsFile {
    pub dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub multiple_of: usize,
    pub norm_eps: f32,
    /// -1 in the published files; replaced by the tokenizer's word count
    pub vocab_size: i64,
}

impl Default for ParamsFile {
    fn default() -> Self {
        Self {
            dim: 512,
            n_layers: 8,
            n_heads: 8,
            multiple_of: 256,
            norm_eps: 1e-5,
            vocab_size: -1,
        }
    }
}

impl ParamsFile {
    pub fn from_json(text: &str) -> Result<Self, InferenceError> {
        serde_json::from_str(text).map_err(|e| InferenceError::InvalidParams(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let params = Self::from_json(&text)?;
        debug!("Loaded parameters from {}: {:?}", path.display(), params);
        Ok(params)
    }
}

/// Architecture parameters the model skeleton is sized from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArgs {
    /// Embedding dimension
    pub dim: usize,
    /// Number of transformer blocks
    pub n_layers: usize,
    /// Number of attention heads
    pub n_heads: usize,
    /// Feed-forward width is rounded up to a multiple of this
    pub multiple_of: usize,
    /// RMSNorm epsilon
    pub norm_eps: f32,
    /// Vocabulary size; negative until the tokenizer has been loaded
    pub vocab_size: i64,
    pub max_seq_len: usize,
    pub max_batch_size: usize,
}

impl ModelArgs {
    /// Merges a parsed parameter file with the fixed sequence and batch limits.
    pub fn from_params(params: ParamsFile) -> Self {
        Self {
            dim: params.dim,
            n_layers: params.n_layers,
            n_heads: params.n_heads,
            multiple_of: params.multiple_of,
            norm_eps: params.norm_eps,
            vocab_size: params.vocab_size,
            max_seq_len: MAX_SEQ_LEN,
            max_batch_size: MAX_BATCH_SIZE,
        }
    }

    /// Returns a copy with the vocabulary size taken from the tokenizer.
    pub fn with_vocab_size(mut self, n_words: usize) -> Self {
        self.vocab_size = n_words as i64;
        self
    }

    /// Vocabulary size as a count. Only meaningful after `with_vocab_size`.
    pub fn vocab(&self) -> usize {
        self.vocab_size.max(0) as usize
    }

    pub fn head_dim(&self) -> usize {
        self.dim / self.n_heads
    }

    /// Width of the SwiGLU feed-forward layer
    pub fn hidden_dim(&self) -> usize {
        let hidden = 2 * (4 * self.dim) / 3;
        self.multiple_of * ((hidden + self.multiple_of - 1) / self.multiple_of)
    }

    pub fn validate(&self) -> Result<(), InferenceError> {
        let positive = [
            ("dim", self.dim),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("multiple_of", self.multiple_of),
            ("max_seq_len", self.max_seq_len),
            ("max_batch_size", self.max_batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(InferenceError::InvalidParams(format!("{} must be > 0", name)));
            }
        }
        if self.vocab_size <= 0 {
            return Err(InferenceError::InvalidParams(format!(
                "vocab_size must be > 0, got {}",
                self.vocab_size
            )));
        }
        if self.dim % self.n_heads != 0 {
            return Err(InferenceError::InvalidParams(format!(
                "dim ({}) must be divisible by n_heads ({})",
                self.dim, self.n_heads
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(InferenceError::InvalidParams(format!(
                "head dimension ({}) must be even for rotary embeddings",
                self.head_dim()
            )));
        }
        if !(self.norm_eps > 0.0) {
            return Err(InferenceError::InvalidParams(format!(
                "norm_eps must be > 0, got {}",
                self.norm_eps
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS_7B: &str =
        r#"{"dim": 4096, "multiple_of": 256, "n_heads": 32, "n_layers": 32, "norm_eps": 1e-06, "vocab_size": -1}"#;

    #[test]
    fn test_merge_fixed_limits() {
        let params = ParamsFile::from_json(PARAMS_7B).unwrap();
        let args = ModelArgs::from_params(params).with_vocab_size(32000);

        assert_eq!(args.max_seq_len, 2048);
        assert_eq!(args.max_batch_size, 1);
        assert_eq!(args.vocab_size, 32000);
        assert_eq!(args.head_dim(), 128);
        assert_eq!(args.hidden_dim(), 11008);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let params = ParamsFile::from_json(r#"{"dim": 64, "n_heads": 4}"#).unwrap();
        assert_eq!(params.n_layers, 8);
        assert_eq!(params.multiple_of, 256);
        assert_eq!(params.vocab_size, -1);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = ParamsFile::from_json(r#"{"dim": 64, "rope_theta": 10000.0}"#).unwrap_err();
        assert!(err.to_string().contains("rope_theta"));

        // The fixed limits cannot be overridden from the file
        let err = ParamsFile::from_json(r#"{"dim": 64, "max_seq_len": 4096}"#).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidParams(_)));
    }

    #[test]
    fn test_validate_requires_vocab() {
        let args = ModelArgs::from_params(ParamsFile::default());
        assert!(args.validate().is_err());
        assert!(args.with_vocab_size(100).validate().is_ok());
    }

    #[test]
    fn test_validate_head_split() {
        let params = ParamsFile { dim: 30, n_heads: 4, ..ParamsFile::default() };
        let args = ModelArgs::from_params(params).with_vocab_size(10);
        assert!(args.validate().is_err());
    }
}
