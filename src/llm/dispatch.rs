use std::error::Error;
use std::time::Instant;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::llm::backend::DeviceSet;
use crate::llm::checkpoint::TensorSource;
use crate::llm::error::InferenceError;
use crate::llm::model::Transformer;
use crate::llm::placement::{DeviceMap, PlacementPolicy};
use crate::llm::tensor::DeviceTensor;

/// Computes a device map for `model` and streams every checkpoint tensor onto its device.
///
/// Tensors the model has no slot for are skipped with a warning. Each weight's
/// bytes are charged to its device before it is converted, so an exhausted
/// budget fails before the copy is made.
pub fn load_checkpoint_and_dispatch(
    model: &mut Transformer,
    source: &dyn TensorSource,
    devices: &DeviceSet,
    policy: &dyn PlacementPolicy,
) -> Result<DeviceMap, Box<dyn Error + Send + Sync>> {
    let units = model.placement_units();
    let map = policy.place(&units, &devices.infos())?;
    info!(
        "Placed {} modules on {} device(s) with the {} policy",
        map.len(),
        map.devices().len(),
        policy.name()
    );

    let tensors = source.tensor_infos();
    let start = Instant::now();
    let pb = ProgressBar::new(tensors.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold.dim} [{bar:40}] {pos}/{len} {wide_msg}")?.progress_chars("=> "),
    );
    pb.set_prefix("Loading weights");

    for tensor in tensors {
        pb.set_message(tensor.name.clone());
        let Some(slot) = model.slot(&tensor.name) else {
            warn!("Skipping checkpoint tensor '{}' with no matching parameter", tensor.name);
            pb.inc(1);
            continue;
        };
        if slot.shape != tensor.shape {
            pb.abandon();
            return Err(Box::new(InferenceError::Shape(format!(
                "checkpoint tensor '{}' has shape {:?}, model expects {:?}",
                tensor.name, tensor.shape, slot.shape
            ))));
        }

        let device = map.device_for_param(&tensor.name).ok_or_else(|| {
            InferenceError::Checkpoint(format!("no device assigned for '{}'", tensor.name))
        })?;
        let backend = devices.get(device)?;

        let reservation = backend.reserve(model.dtype().bytes_for(&tensor.shape))?;
        let data = source.read_tensor(&tensor.name)?.cast(model.dtype());
        let weight = DeviceTensor::new(device, tensor.shape, data, reservation)?;
        debug!("{} -> device {} ({} bytes)", tensor.name, device, weight.size_in_bytes());
        model.set(&tensor.name, weight)?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    let missing = model.missing();
    if !missing.is_empty() {
        let shown: Vec<&str> = missing.iter().take(5).copied().collect();
        return Err(Box::new(InferenceError::Checkpoint(format!(
            "{} weight(s) missing from checkpoint: {}{}",
            missing.len(),
            shown.join(", "),
            if missing.len() > shown.len() { ", ..." } else { "" }
        ))));
    }

    info!(
        "Loaded {} parameters ({} bytes) in {:.2?}",
        model.parameter_count(),
        devices.total_allocated(),
        start.elapsed()
    );
    Ok(map)
}
