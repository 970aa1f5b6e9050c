mod paths;
mod session;

pub use paths::{ModelFiles, CHECKPOINT_FILE, PARAMS_FILE, TOKENIZER_FILE};
pub use session::{CheckpointLoader, EngineFactory, LlamaInference, LlamaInferenceBuilder, TokenizerLoader};
