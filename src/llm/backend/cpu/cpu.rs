use std::error::Error;
use std::fmt;
use std::sync::Arc;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::super::backend::{Backend, DeviceId, DeviceInfo, MemoryAccountant, Reservation};
use crate::llm::error::InferenceError;
use crate::llm::tensor::{DeviceTensor, TensorData};

/// CPU backend implementation using ndarray and rayon
#[derive(Clone)]
pub struct CpuBackend {
    info: DeviceInfo,
    memory: Arc<MemoryAccountant>,
}

impl CpuBackend {
    /// Create a new CPU backend with an optional memory budget in bytes.
    pub fn new(id: DeviceId, name: impl Into<String>, memory_limit: Option<u64>) -> Self {
        let name = name.into();
        Self {
            memory: MemoryAccountant::new(name.clone(), memory_limit),
            info: DeviceInfo { id, name, memory_limit, allocated: 0 },
        }
    }
}

impl fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBackend")
            .field("name", &self.info.name)
            .field("memory_limit", &self.info.memory_limit)
            .field("allocated", &self.memory.used())
            .finish()
    }
}

fn shape_error(msg: String) -> Box<dyn Error + Send + Sync> {
    Box::new(InferenceError::Shape(msg))
}

impl Backend for CpuBackend {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn reserve(&self, bytes: u64) -> Result<Reservation, Box<dyn Error + Send + Sync>> {
        Ok(self.memory.reserve(bytes)?)
    }

    fn allocated_bytes(&self) -> u64 {
        self.memory.used()
    }

    /// Matrix-vector product. f32 weights go through ndarray; half precision
    /// weights are widened row by row in parallel.
    fn matvec(&self, weight: &DeviceTensor, x: &[f32], out: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>> {
        let shape = weight.shape();
        if shape.len() != 2 || shape[0] != out.len() || shape[1] != x.len() {
            return Err(shape_error(format!(
                "matvec with weight {:?}, input {} and output {}",
                shape,
                x.len(),
                out.len()
            )));
        }
        let cols = shape[1];

        match weight.data() {
            TensorData::F32(values) => {
                let w = ArrayView2::from_shape((shape[0], cols), values.as_slice())?;
                let result = w.dot(&ArrayView1::from(x));
                for (o, r) in out.iter_mut().zip(result.iter()) {
                    *o = *r;
                }
            }
            TensorData::F16(values) => {
                out.par_iter_mut().enumerate().for_each(|(row, o)| {
                    let start = row * cols;
                    *o = values[start..start + cols]
                        .iter()
                        .zip(x)
                        .map(|(w, v)| w.to_f32() * v)
                        .sum();
                });
            }
            TensorData::BF16(values) => {
                out.par_iter_mut().enumerate().for_each(|(row, o)| {
                    let start = row * cols;
                    *o = values[start..start + cols]
                        .iter()
                        .zip(x)
                        .map(|(w, v)| w.to_f32() * v)
                        .sum();
                });
            }
        }
        Ok(())
    }

    fn rms_norm(
        &self,
        x: &[f32],
        weight: &DeviceTensor,
        out: &mut [f32],
        eps: f32,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if weight.size() != x.len() || out.len() != x.len() {
            return Err(shape_error(format!(
                "rms_norm with weight {:?}, input {} and output {}",
                weight.shape(),
                x.len(),
                out.len()
            )));
        }
        // Calculate sum of squares
        let ss: f32 = x.iter().map(|&v| v * v).sum();
        let norm_factor = 1.0 / (ss / x.len() as f32 + eps).sqrt();

        match weight.data() {
            TensorData::F32(w) => {
                for ((o, &v), &w) in out.iter_mut().zip(x).zip(w) {
                    *o = norm_factor * v * w;
                }
            }
            TensorData::F16(w) => {
                for ((o, &v), w) in out.iter_mut().zip(x).zip(w) {
                    *o = norm_factor * v * w.to_f32();
                }
            }
            TensorData::BF16(w) => {
                for ((o, &v), w) in out.iter_mut().zip(x).zip(w) {
                    *o = norm_factor * v * w.to_f32();
                }
            }
        }
        Ok(())
    }

    fn softmax(&self, x: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>> {
        if x.is_empty() {
            return Ok(());
        }
        // Find max value for numerical stability
        let max_val = x.iter().fold(f32::NEG_INFINITY, |max, &val| max.max(val));

        let mut sum = 0.0;
        for v in x.iter_mut() {
            *v = (*v - max_val).exp();
            sum += *v;
        }
        for v in x.iter_mut() {
            *v /= sum;
        }
        Ok(())
    }

    fn silu(&self, x: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>> {
        for v in x.iter_mut() {
            *v = *v / (1.0 + (-*v).exp());
        }
        Ok(())
    }

    fn embedding(&self, table: &DeviceTensor, token: usize, out: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>> {
        table.row_f32(token, out)
    }
}
