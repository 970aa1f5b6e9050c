mod tensor;

pub use tensor::{DType, DeviceTensor, TensorData};
