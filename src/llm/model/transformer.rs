use std::collections::HashMap;
use tracing::debug;

use crate::llm::backend::DeviceId;
use crate::llm::error::InferenceError;
use crate::llm::params::ModelArgs;
use crate::llm::placement::{unit_of, PlacementUnit};
use crate::llm::tensor::{DType, DeviceTensor};

/// One named parameter of the model, empty until weights are dispatched
#[derive(Debug)]
pub struct ParamSlot {
    pub name: String,
    pub shape: Vec<usize>,
    /// Placement unit the parameter moves with
    pub unit: String,
    tensor: Option<DeviceTensor>,
}

impl ParamSlot {
    fn new(name: String, shape: Vec<usize>) -> Self {
        let unit = unit_of(&name);
        Self { name, shape, unit, tensor: None }
    }

    pub fn tensor(&self) -> Option<&DeviceTensor> {
        self.tensor.as_ref()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Weights of one transformer block, all on the same device
pub struct LayerWeights<'a> {
    pub device: DeviceId,
    pub attention_norm: &'a DeviceTensor,
    pub wq: &'a DeviceTensor,
    pub wk: &'a DeviceTensor,
    pub wv: &'a DeviceTensor,
    pub wo: &'a DeviceTensor,
    pub ffn_norm: &'a DeviceTensor,
    pub w1: &'a DeviceTensor,
    pub w2: &'a DeviceTensor,
    pub w3: &'a DeviceTensor,
}

/// LLaMA decoder-only transformer described by its parameter slots.
///
/// `empty` builds the shape-only skeleton; dispatch then fills every slot with a
/// tensor on its assigned device.
#[derive(Debug)]
pub struct Transformer {
    args: ModelArgs,
    dtype: DType,
    slots: Vec<ParamSlot>,
    index: HashMap<String, usize>,
}

impl Transformer {
    /// Lays out every parameter for `args` without allocating storage.
    pub fn empty(args: &ModelArgs, dtype: DType) -> Result<Self, InferenceError> {
        args.validate()?;
        let dim = args.dim;
        let hidden = args.hidden_dim();
        let vocab = args.vocab();

        let mut slots = vec![ParamSlot::new("tok_embeddings.weight".to_string(), vec![vocab, dim])];
        for i in 0..args.n_layers {
            let p = |suffix: &str, shape: Vec<usize>| ParamSlot::new(format!("layers.{}.{}", i, suffix), shape);
            slots.push(p("attention.wq.weight", vec![dim, dim]));
            slots.push(p("attention.wk.weight", vec![dim, dim]));
            slots.push(p("attention.wv.weight", vec![dim, dim]));
            slots.push(p("attention.wo.weight", vec![dim, dim]));
            slots.push(p("feed_forward.w1.weight", vec![hidden, dim]));
            slots.push(p("feed_forward.w2.weight", vec![dim, hidden]));
            slots.push(p("feed_forward.w3.weight", vec![hidden, dim]));
            slots.push(p("attention_norm.weight", vec![dim]));
            slots.push(p("ffn_norm.weight", vec![dim]));
        }
        slots.push(ParamSlot::new("norm.weight".to_string(), vec![dim]));
        slots.push(ParamSlot::new("output.weight".to_string(), vec![vocab, dim]));

        let index = slots.iter().enumerate().map(|(i, s)| (s.name.clone(), i)).collect();
        let model = Self { args: args.clone(), dtype, slots, index };
        debug!(
            "Built empty transformer: {} parameters in {} tensors, {} bytes as {}",
            model.parameter_count(),
            model.slots.len(),
            model.size_in_bytes(),
            dtype
        );
        Ok(model)
    }

    pub fn args(&self) -> &ModelArgs {
        &self.args
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&ParamSlot> {
        self.index.get(name).map(|&i| &self.slots[i])
    }

    pub fn parameter_count(&self) -> usize {
        self.slots.iter().map(ParamSlot::numel).sum()
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.slots.iter().map(|s| self.dtype.bytes_for(&s.shape)).sum()
    }

    /// Top-level modules with their sizes, in forward order.
    pub fn placement_units(&self) -> Vec<PlacementUnit> {
        let mut units: Vec<PlacementUnit> = Vec::new();
        for slot in &self.slots {
            let bytes = self.dtype.bytes_for(&slot.shape);
            match units.last_mut() {
                Some(last) if last.name == slot.unit => last.size_bytes += bytes,
                _ => units.push(PlacementUnit { name: slot.unit.clone(), size_bytes: bytes }),
            }
        }
        units
    }

    /// Stores a dispatched weight in its slot.
    pub fn set(&mut self, name: &str, tensor: DeviceTensor) -> Result<(), InferenceError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| InferenceError::Checkpoint(format!("model has no parameter '{}'", name)))?;
        let slot = &mut self.slots[i];
        if tensor.shape() != slot.shape.as_slice() {
            return Err(InferenceError::Shape(format!(
                "parameter '{}' expects {:?}, got {:?}",
                name,
                slot.shape,
                tensor.shape()
            )));
        }
        if tensor.dtype() != self.dtype {
            return Err(InferenceError::Shape(format!(
                "parameter '{}' expects {}, got {}",
                name,
                self.dtype,
                tensor.dtype()
            )));
        }
        slot.tensor = Some(tensor);
        Ok(())
    }

    pub fn is_materialized(&self) -> bool {
        self.slots.iter().all(|s| s.tensor.is_some())
    }

    /// Names of slots that have not received a weight
    pub fn missing(&self) -> Vec<&str> {
        self.slots.iter().filter(|s| s.tensor.is_none()).map(|s| s.name.as_str()).collect()
    }

    pub fn weight(&self, name: &str) -> Result<&DeviceTensor, InferenceError> {
        self.slot(name)
            .and_then(ParamSlot::tensor)
            .ok_or_else(|| InferenceError::Checkpoint(format!("weight '{}' is not loaded", name)))
    }

    pub fn embeddings(&self) -> Result<&DeviceTensor, InferenceError> {
        self.weight("tok_embeddings.weight")
    }

    pub fn final_norm(&self) -> Result<&DeviceTensor, InferenceError> {
        self.weight("norm.weight")
    }

    pub fn output(&self) -> Result<&DeviceTensor, InferenceError> {
        self.weight("output.weight")
    }

    pub fn layer(&self, i: usize) -> Result<LayerWeights<'_>, InferenceError> {
        let w = |suffix: &str| self.weight(&format!("layers.{}.{}", i, suffix));
        let wq = w("attention.wq.weight")?;
        Ok(LayerWeights {
            device: wq.device(),
            attention_norm: w("attention_norm.weight")?,
            wq,
            wk: w("attention.wk.weight")?,
            wv: w("attention.wv.weight")?,
            wo: w("attention.wo.weight")?,
            ffn_norm: w("ffn_norm.weight")?,
            w1: w("feed_forward.w1.weight")?,
            w2: w("feed_forward.w2.weight")?,
            w3: w("feed_forward.w3.weight")?,
        })
    }
}
