#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod estimator;
pub mod retarget;
pub mod rgba_converter;
pub mod rig;
pub mod scheduler;
pub mod skeleton;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::NokhwaVideoSource;
pub use estimator::{EstimatorConfig, LandmarkEstimator, ModelComplexity, OrtHandEstimator};
pub use retarget::Retargeter;
pub use scheduler::SchedulerConfig;
pub use skeleton::{SharedPose, SkeletonPose};
