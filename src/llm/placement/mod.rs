mod map;
mod policy;

pub use map::{unit_of, DeviceMap, PlacementUnit};
pub use policy::{AutoPlacement, BalancedPlacement, PlacementPolicy, PlacementStrategy, SingleDevicePlacement};
