mod buffer;
mod vector;

pub use buffer::{DeviceBuffer, OutputView};
pub use vector::Bf16x8;
