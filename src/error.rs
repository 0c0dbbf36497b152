use thiserror::Error;

/// Errors surfaced to callers of device enumeration and acquisition.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("requested device `{0}` was not found")]
    NotFound(String),
    #[error("no video input device is available")]
    NoVideoInput,
    #[error("access to device `{0}` was denied")]
    AccessDenied(String),
    #[error("render target is not available yet")]
    RenderTargetUnavailable,
    #[error("virtual camera is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
