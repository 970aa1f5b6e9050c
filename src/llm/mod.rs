// Declare submodules
pub mod backend;
pub mod checkpoint;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod params;
pub mod placement;
pub mod session;
pub mod tensor;
pub mod tokenizer;
pub mod variant;

// Re-export types for external use
pub use error::{ErrorKind, InferenceError};
pub use params::ModelArgs;
pub use session::{LlamaInference, LlamaInferenceBuilder};
