pub mod device;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod render;
pub mod settings;
pub mod types;

#[cfg(test)]
mod testing;

pub use device::{StreamConstraints, VirtualCamera};
pub use error::DeviceError;
