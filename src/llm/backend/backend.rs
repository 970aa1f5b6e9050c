use std::error::Error;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cpu::CpuBackend;
use crate::llm::error::InferenceError;
use crate::llm::tensor::{DeviceTensor, TensorData};

/// Index of a device within a `DeviceSet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Description of a device as seen by placement policies
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    /// Memory budget in bytes, `None` for unbounded
    pub memory_limit: Option<u64>,
    /// Bytes already charged when this description was taken
    pub allocated: u64,
}

impl DeviceInfo {
    /// Budget left for new allocations, `None` for unbounded
    pub fn available(&self) -> Option<u64> {
        self.memory_limit.map(|limit| limit.saturating_sub(self.allocated))
    }
}

/// Settings entry describing one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    /// Memory budget in MiB; absent means unbounded
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
}

/// Tracks how much of a device's budget is in use.
#[derive(Debug)]
pub struct MemoryAccountant {
    name: String,
    limit: Option<u64>,
    used: AtomicU64,
}

impl MemoryAccountant {
    pub fn new(name: impl Into<String>, limit: Option<u64>) -> Arc<Self> {
        Arc::new(Self { name: name.into(), limit, used: AtomicU64::new(0) })
    }

    /// Charges `bytes` against the budget, failing without side effects when it does not fit.
    pub fn reserve(self: &Arc<Self>, bytes: u64) -> Result<Reservation, InferenceError> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if let Some(limit) = self.limit {
                if next > limit {
                    return Err(InferenceError::OutOfMemory {
                        device: self.name.clone(),
                        requested: bytes,
                        available: limit.saturating_sub(current),
                    });
                }
            }
            match self.used.compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        Ok(Reservation { accountant: Arc::clone(self), bytes })
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

/// Bytes charged to a device; released on drop.
#[derive(Debug)]
pub struct Reservation {
    accountant: Arc<MemoryAccountant>,
    bytes: u64,
}

impl Reservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.accountant.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// A compute device: memory accounting plus the kernels the generator needs.
pub trait Backend: Send + Sync + Debug {
    fn info(&self) -> &DeviceInfo;

    /// Charges `bytes` against this device's budget
    fn reserve(&self, bytes: u64) -> Result<Reservation, Box<dyn Error + Send + Sync>>;

    /// Bytes currently charged to this device
    fn allocated_bytes(&self) -> u64;

    /// Places `data` on this device, charging its size first
    fn upload(&self, shape: Vec<usize>, data: TensorData) -> Result<DeviceTensor, Box<dyn Error + Send + Sync>> {
        let bytes = data.dtype().bytes_for(&shape);
        let reservation = self.reserve(bytes)?;
        DeviceTensor::new(self.info().id, shape, data, reservation)
    }

    /// Computes `out = W x` for a weight of shape [out.len(), x.len()]
    fn matvec(&self, weight: &DeviceTensor, x: &[f32], out: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// RMS normalisation of `x` scaled by `weight`
    fn rms_norm(
        &self,
        x: &[f32],
        weight: &DeviceTensor,
        out: &mut [f32],
        eps: f32,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// In-place softmax
    fn softmax(&self, x: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// In-place SiLU: x * sigmoid(x)
    fn silu(&self, x: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Copies one row of an embedding table into `out`
    fn embedding(&self, table: &DeviceTensor, token: usize, out: &mut [f32]) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Ordered collection of the devices a model may be placed on.
#[derive(Debug, Clone)]
pub struct DeviceSet {
    backends: Vec<Arc<dyn Backend>>,
}

impl DeviceSet {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    /// A single CPU device with no memory budget
    pub fn cpu() -> Self {
        Self::new(vec![Arc::new(CpuBackend::new(DeviceId(0), "cpu0", None))])
    }

    /// Builds one CPU backend per spec, in order. An empty list yields `cpu()`.
    pub fn from_specs(specs: &[DeviceSpec]) -> Self {
        if specs.is_empty() {
            return Self::cpu();
        }
        let backends = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let limit = spec.max_memory_mb.map(|mb| mb * 1024 * 1024);
                debug!("Device {} '{}' with budget {:?} bytes", i, spec.name, limit);
                Arc::new(CpuBackend::new(DeviceId(i), spec.name.clone(), limit)) as Arc<dyn Backend>
            })
            .collect();
        Self::new(backends)
    }

    pub fn get(&self, id: DeviceId) -> Result<&Arc<dyn Backend>, Box<dyn Error + Send + Sync>> {
        self.backends
            .get(id.0)
            .ok_or_else(|| format!("No device with id {} ({} devices available)", id, self.backends.len()).into())
    }

    /// Snapshot of every device, including what is already charged to it.
    pub fn infos(&self) -> Vec<DeviceInfo> {
        self.backends
            .iter()
            .map(|b| DeviceInfo { allocated: b.allocated_bytes(), ..b.info().clone() })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Bytes charged across every device
    pub fn total_allocated(&self) -> u64 {
        self.backends.iter().map(|b| b.allocated_bytes()).sum()
    }
}
