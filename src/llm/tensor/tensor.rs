use std::error::Error;
use std::fmt::{self, Debug};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::llm::backend::{DeviceId, Reservation};
use crate::llm::error::InferenceError;

/// Element types weights can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F16,
    BF16,
    F32,
}

impl DType {
    /// Size of one element in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 => 4,
        }
    }

    /// Bytes needed for a tensor of the given shape
    pub fn bytes_for(&self, shape: &[usize]) -> u64 {
        shape.iter().product::<usize>() as u64 * self.size_in_bytes() as u64
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::F32 => write!(f, "f32"),
        }
    }
}

/// Owned element storage
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
}

impl TensorData {
    /// Converts to another element type, returning self unchanged when it already matches.
    pub fn cast(self, dst: DType) -> Self {
        if self.dtype() == dst {
            return self;
        }
        let values = self.to_f32_vec();
        match dst {
            DType::F16 => TensorData::F16(values.iter().map(|&v| f16::from_f32(v)).collect()),
            DType::BF16 => TensorData::BF16(values.iter().map(|&v| bf16::from_f32(v)).collect()),
            DType::F32 => TensorData::F32(values),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F16(_) => DType::F16,
            TensorData::BF16(_) => DType::BF16,
            TensorData::F32(_) => DType::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F16(v) => v.len(),
            TensorData::BF16(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        self.copy_range_f32(0, &mut out);
        out
    }

    /// Copies `out.len()` elements starting at `start`, widening to f32.
    pub fn copy_range_f32(&self, start: usize, out: &mut [f32]) {
        let end = start + out.len();
        match self {
            TensorData::F16(v) => {
                for (o, x) in out.iter_mut().zip(&v[start..end]) {
                    *o = x.to_f32();
                }
            }
            TensorData::BF16(v) => {
                for (o, x) in out.iter_mut().zip(&v[start..end]) {
                    *o = x.to_f32();
                }
            }
            TensorData::F32(v) => out.copy_from_slice(&v[start..end]),
        }
    }
}

/// A materialised weight living on one device.
///
/// The device's memory budget stays charged for as long as the tensor exists.
pub struct DeviceTensor {
    device: DeviceId,
    shape: Vec<usize>,
    data: TensorData,
    _reservation: Reservation,
}

impl DeviceTensor {
    pub fn new(
        device: DeviceId,
        shape: Vec<usize>,
        data: TensorData,
        reservation: Reservation,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Box::new(InferenceError::Shape(format!(
                "{} elements cannot fill shape {:?} (expected {})",
                data.len(),
                shape,
                expected
            ))));
        }
        Ok(Self { device, shape, data, _reservation: reservation })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.dtype().bytes_for(&self.shape)
    }

    /// Copies row `index` of a 2-D tensor into `out` as f32.
    pub fn row_f32(&self, index: usize, out: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.shape.len() != 2 || index >= self.shape[0] || out.len() != self.shape[1] {
            return Err(Box::new(InferenceError::Shape(format!(
                "cannot read row {} of width {} from tensor of shape {:?}",
                index,
                out.len(),
                self.shape
            ))));
        }
        self.data.copy_range_f32(index * self.shape[1], out);
        Ok(())
    }
}

impl Debug for DeviceTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceTensor {{ device: {}, shape: {:?}, dtype: {}, data: truncated }}",
            self.device,
            self.shape,
            self.dtype()
        )
    }
}
