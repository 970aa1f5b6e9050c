use std::error::Error;
use std::path::{Path, PathBuf};
use candle_core::pickle::PthTensors;
use half::{bf16, f16};
use tracing::{debug, info};

use super::{TensorInfo, TensorSource};
use crate::llm::error::InferenceError;
use crate::llm::tensor::{DType, TensorData};

/// A PyTorch `state_dict.pth` archive read through candle's pickle loader.
pub struct TorchCheckpoint {
    path: PathBuf,
    pth: PthTensors,
    tensors: Vec<TensorInfo>,
}

/// Element type a stored tensor is read as; f64 is narrowed to f32
fn element_type(dtype: candle_core::DType) -> Option<DType> {
    match dtype {
        candle_core::DType::F16 => Some(DType::F16),
        candle_core::DType::BF16 => Some(DType::BF16),
        candle_core::DType::F32 | candle_core::DType::F64 => Some(DType::F32),
        _ => None,
    }
}

impl TorchCheckpoint {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = path.as_ref().to_path_buf();
        let pth = PthTensors::new(&path, None).map_err(|e| {
            InferenceError::Checkpoint(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut tensors = Vec::with_capacity(pth.tensor_infos().len());
        for (name, stored) in pth.tensor_infos() {
            let Some(dtype) = element_type(stored.dtype) else {
                debug!("Ignoring non-float tensor '{}' ({:?})", name, stored.dtype);
                continue;
            };
            if !stored.layout.is_contiguous() {
                return Err(Box::new(InferenceError::Checkpoint(format!(
                    "tensor '{}' is not contiguous (shape {:?}, stride {:?})",
                    name,
                    stored.layout.shape().dims(),
                    stored.layout.stride()
                ))));
            }
            tensors.push(TensorInfo { name: name.clone(), dtype, shape: stored.layout.shape().dims().to_vec() });
        }
        if tensors.is_empty() {
            return Err(Box::new(InferenceError::Checkpoint(format!(
                "{} holds no tensors",
                path.display()
            ))));
        }
        tensors.sort_by(|a, b| a.name.cmp(&b.name));

        info!("Opened checkpoint {} ({} tensors)", path.display(), tensors.len());
        Ok(Self { path, pth, tensors })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl TensorSource for TorchCheckpoint {
    fn tensor_infos(&self) -> Vec<TensorInfo> {
        self.tensors.clone()
    }

    fn read_tensor(&self, name: &str) -> Result<TensorData, Box<dyn Error + Send + Sync>> {
        let corrupt = |e: candle_core::Error| InferenceError::Checkpoint(format!("tensor '{}': {}", name, e));
        let tensor = self
            .pth
            .get(name)
            .map_err(corrupt)?
            .ok_or_else(|| InferenceError::Checkpoint(format!("no tensor named '{}' in {}", name, self.path.display())))?
            .flatten_all()
            .map_err(corrupt)?;

        let data = match tensor.dtype() {
            candle_core::DType::F16 => TensorData::F16(tensor.to_vec1::<f16>().map_err(corrupt)?),
            candle_core::DType::BF16 => TensorData::BF16(tensor.to_vec1::<bf16>().map_err(corrupt)?),
            candle_core::DType::F32 => TensorData::F32(tensor.to_vec1::<f32>().map_err(corrupt)?),
            candle_core::DType::F64 => TensorData::F32(
                tensor
                    .to_dtype(candle_core::DType::F32)
                    .and_then(|t| t.to_vec1::<f32>())
                    .map_err(corrupt)?,
            ),
            other => {
                return Err(Box::new(InferenceError::Checkpoint(format!(
                    "tensor '{}' has unsupported element type {:?}",
                    name, other
                ))))
            }
        };
        Ok(data)
    }
}
