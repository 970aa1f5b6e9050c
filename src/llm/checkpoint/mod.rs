use std::error::Error;
use crate::llm::tensor::{DType, TensorData};

#[cfg(test)]
pub(crate) mod fixtures;
mod torch;

pub use torch::TorchCheckpoint;

/// Name, element type and shape of one stored tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
}

/// A readable collection of named weight tensors
pub trait TensorSource: Send + Sync {
    /// Every tensor the source holds, sorted by name
    fn tensor_infos(&self) -> Vec<TensorInfo>;

    /// Reads one tensor in its stored element type
    fn read_tensor(&self, name: &str) -> Result<TensorData, Box<dyn Error + Send + Sync>>;
}
