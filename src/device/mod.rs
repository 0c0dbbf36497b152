pub mod emulator;
pub mod source;
pub mod stream;

pub use emulator::{
    EmulatorConfig, EmulatorState, EstimatorFactory, VIRTUAL_DEVICE_ID, VIRTUAL_DEVICE_LABEL,
    VirtualCamera, VirtualCameraBuilder, virtual_device,
};
pub use source::{
    DeviceIdConstraint, NullVideoSource, StreamConstraints, VideoConstraints, VideoSource,
};
pub use stream::{MediaStream, MediaTrack, ReadyState, TrackHandle};
