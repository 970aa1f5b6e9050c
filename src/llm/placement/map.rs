use std::collections::HashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::backend::DeviceId;

/// Parameters under `layers.{i}.` belong to one transformer block
static LAYER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^layers\.(\d+)\.").expect("layer pattern is valid")
});

/// Returns the placement unit a parameter belongs to.
///
/// `layers.3.attention.wq.weight` maps to `layers.3`; every other name maps to
/// its first component (`tok_embeddings`, `norm`, `output`).
pub fn unit_of(param: &str) -> String {
    if let Some(caps) = LAYER_PATTERN.captures(param) {
        return format!("layers.{}", &caps[1]);
    }
    param.split('.').next().unwrap_or(param).to_string()
}

/// A module that is always placed whole
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementUnit {
    pub name: String,
    pub size_bytes: u64,
}

/// Assignment of placement units to devices, in model order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMap {
    assignments: Vec<(String, DeviceId)>,
    index: HashMap<String, usize>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, unit: impl Into<String>, device: DeviceId) {
        let unit = unit.into();
        match self.index.get(&unit) {
            Some(&i) => self.assignments[i].1 = device,
            None => {
                self.index.insert(unit.clone(), self.assignments.len());
                self.assignments.push((unit, device));
            }
        }
    }

    pub fn device_for_unit(&self, unit: &str) -> Option<DeviceId> {
        self.index.get(unit).map(|&i| self.assignments[i].1)
    }

    /// Which device holds parameter `param`
    pub fn device_for_param(&self, param: &str) -> Option<DeviceId> {
        self.device_for_unit(&unit_of(param))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DeviceId)> {
        self.assignments.iter().map(|(u, d)| (u.as_str(), *d))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Distinct devices in first-use order
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut seen = Vec::new();
        for (_, d) in &self.assignments {
            if !seen.contains(d) {
                seen.push(*d);
            }
        }
        seen
    }
}
