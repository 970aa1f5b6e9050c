mod engine;
mod forward;
mod generator;
mod sampler;

pub use engine::{GenerationEngine, SamplingParams};
pub use generator::LlamaGenerator;
