//! Load LLaMA checkpoints across one or more devices and generate text.
//!
//! [`LlamaInference`] validates a model directory, reads `params.json` and the
//! SentencePiece tokenizer, builds an empty transformer, dispatches the
//! checkpoint weights under a placement policy and hands the result to a
//! generation engine.

pub mod config;
pub mod llm;

pub use llm::engine::SamplingParams;
pub use llm::session::LlamaInference;
pub use llm::variant::ModelVariant;
