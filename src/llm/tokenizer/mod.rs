use std::error::Error;

mod proto;
mod sentencepiece;

pub use sentencepiece::{PieceType, SentencePieceTokenizer};
#[cfg(test)]
pub(crate) use sentencepiece::fixtures;

/// Converts text to token ids and back
pub trait Tokenizer: Send + Sync {
    /// Number of entries in the vocabulary
    fn n_words(&self) -> usize;

    /// Beginning-of-sequence token
    fn bos_id(&self) -> u32;

    /// End-of-sequence token
    fn eos_id(&self) -> u32;

    /// Padding token, if the vocabulary defines one
    fn pad_id(&self) -> Option<u32>;

    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>, Box<dyn Error + Send + Sync>>;

    fn decode(&self, tokens: &[u32]) -> Result<String, Box<dyn Error + Send + Sync>>;
}
