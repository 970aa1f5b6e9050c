use std::fmt::Debug;
use std::str::FromStr;
use tracing::debug;

use super::map::{DeviceMap, PlacementUnit};
use crate::llm::backend::{DeviceId, DeviceInfo};
use crate::llm::error::InferenceError;

/// Decides which device each placement unit lives on.
pub trait PlacementPolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn place(&self, units: &[PlacementUnit], devices: &[DeviceInfo]) -> Result<DeviceMap, InferenceError>;
}

fn no_devices() -> InferenceError {
    InferenceError::InvalidArgument("no devices available for placement".to_string())
}

/// Greedy front-to-back fill of `devices`, each capped at `cap(i)` bytes.
///
/// Bytes already charged to a device count against its budget.
fn fill(
    units: &[PlacementUnit],
    devices: &[DeviceInfo],
    cap: impl Fn(usize) -> Option<u64>,
) -> Result<DeviceMap, InferenceError> {
    let mut map = DeviceMap::new();
    let mut current = 0;
    let mut used = 0u64;

    for unit in units {
        loop {
            let device = devices.get(current).ok_or_else(no_devices)?;
            let limit = device.available();
            let fits_soft = cap(current).map_or(true, |c| used + unit.size_bytes <= c);
            // An empty device takes any unit its hard budget allows, even past the soft cap
            let fits_hard = limit.map_or(true, |l| used + unit.size_bytes <= l);
            if fits_hard && (fits_soft || used == 0) {
                map.assign(unit.name.clone(), device.id);
                used += unit.size_bytes;
                break;
            }
            if current + 1 == devices.len() {
                return Err(InferenceError::OutOfMemory {
                    device: device.name.clone(),
                    requested: unit.size_bytes,
                    available: limit.map_or(u64::MAX, |l| l.saturating_sub(used)),
                });
            }
            debug!("Device {} full at {} bytes, moving on before '{}'", device.name, used, unit.name);
            current += 1;
            used = 0;
        }
    }
    Ok(map)
}

/// Fills devices in order, moving on once the next unit would exceed the budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPlacement;

impl PlacementPolicy for AutoPlacement {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn place(&self, units: &[PlacementUnit], devices: &[DeviceInfo]) -> Result<DeviceMap, InferenceError> {
        if devices.is_empty() {
            return Err(no_devices());
        }
        fill(units, devices, |i| devices[i].available())
    }
}

/// Spreads units evenly by size across all devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedPlacement;

impl PlacementPolicy for BalancedPlacement {
    fn name(&self) -> &'static str {
        "balanced"
    }

    fn place(&self, units: &[PlacementUnit], devices: &[DeviceInfo]) -> Result<DeviceMap, InferenceError> {
        if devices.is_empty() {
            return Err(no_devices());
        }
        let total: u64 = units.iter().map(|u| u.size_bytes).sum();
        let n = devices.len() as u64;
        let target = (total + n - 1) / n;
        let last = devices.len() - 1;

        fill(units, devices, |i| {
            let limit = devices[i].available();
            if i == last {
                limit
            } else {
                Some(limit.map_or(target, |l| l.min(target)))
            }
        })
    }
}

/// Puts every unit on one device.
#[derive(Debug, Clone, Copy)]
pub struct SingleDevicePlacement(pub DeviceId);

impl PlacementPolicy for SingleDevicePlacement {
    fn name(&self) -> &'static str {
        "single"
    }

    fn place(&self, units: &[PlacementUnit], devices: &[DeviceInfo]) -> Result<DeviceMap, InferenceError> {
        let device = devices.iter().find(|d| d.id == self.0).ok_or_else(|| {
            InferenceError::InvalidArgument(format!("device {} does not exist ({} devices)", self.0, devices.len()))
        })?;
        let total: u64 = units.iter().map(|u| u.size_bytes).sum();
        if let Some(limit) = device.available() {
            if total > limit {
                return Err(InferenceError::OutOfMemory {
                    device: device.name.clone(),
                    requested: total,
                    available: limit,
                });
            }
        }

        let mut map = DeviceMap::new();
        for unit in units {
            map.assign(unit.name.clone(), device.id);
        }
        Ok(map)
    }
}

/// Placement strategy as written in settings: `auto`, `balanced` or `single:N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategy {
    Auto,
    Balanced,
    Single(usize),
}

impl PlacementStrategy {
    pub fn into_policy(self) -> Box<dyn PlacementPolicy> {
        match self {
            PlacementStrategy::Auto => Box::new(AutoPlacement),
            PlacementStrategy::Balanced => Box::new(BalancedPlacement),
            PlacementStrategy::Single(id) => Box::new(SingleDevicePlacement(DeviceId(id))),
        }
    }
}

impl FromStr for PlacementStrategy {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(PlacementStrategy::Auto),
            "balanced" => Ok(PlacementStrategy::Balanced),
            other => other
                .strip_prefix("single:")
                .and_then(|id| id.parse().ok())
                .map(PlacementStrategy::Single)
                .ok_or_else(|| {
                    InferenceError::InvalidArgument(format!(
                        "unknown placement strategy '{}'; expected auto, balanced or single:N",
                        s
                    ))
                }),
        }
    }
}
