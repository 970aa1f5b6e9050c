mod transformer;

pub use transformer::{LayerWeights, ParamSlot, Transformer};
