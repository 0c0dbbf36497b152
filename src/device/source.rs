use super::stream::MediaStream;
use crate::{error::DeviceError, types::DeviceDescriptor};

/// Requested device id, in any of the shapes callers use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceIdConstraint {
    Id(String),
    Exact(String),
    OneOf(Vec<String>),
}

impl DeviceIdConstraint {
    /// Whether `id` is selectable from this constraint.
    pub fn selects(&self, id: &str) -> bool {
        match self {
            DeviceIdConstraint::Id(value) | DeviceIdConstraint::Exact(value) => value == id,
            DeviceIdConstraint::OneOf(values) => values.iter().any(|value| value == id),
        }
    }

    /// First id named by the constraint.
    pub fn preferred(&self) -> Option<&str> {
        match self {
            DeviceIdConstraint::Id(value) | DeviceIdConstraint::Exact(value) => Some(value),
            DeviceIdConstraint::OneOf(values) => values.first().map(String::as_str),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoConstraints {
    pub device_id: Option<DeviceIdConstraint>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: bool,
}

impl StreamConstraints {
    pub fn any_video() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: false,
        }
    }

    pub fn video_device(device_id: DeviceIdConstraint) -> Self {
        Self {
            video: Some(VideoConstraints {
                device_id: Some(device_id),
                ..VideoConstraints::default()
            }),
            audio: false,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        let video = self.video.get_or_insert_with(VideoConstraints::default);
        video.width = Some(width);
        video.height = Some(height);
        self
    }

    pub fn device_id(&self) -> Option<&DeviceIdConstraint> {
        self.video.as_ref()?.device_id.as_ref()
    }
}

/// Platform facility for discovering and opening capture devices.
pub trait VideoSource: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    fn acquire(&self, constraints: &StreamConstraints) -> Result<MediaStream, DeviceError>;
}

/// Facility with no devices at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullVideoSource;

impl VideoSource for NullVideoSource {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Ok(Vec::new())
    }

    fn acquire(&self, constraints: &StreamConstraints) -> Result<MediaStream, DeviceError> {
        match constraints.device_id().and_then(DeviceIdConstraint::preferred) {
            Some(id) => Err(DeviceError::NotFound(id.to_string())),
            None => Err(DeviceError::NoVideoInput),
        }
    }
}

/// Picks the camera that feeds the pipeline: a requested device is matched
/// by label first, then by id; otherwise the first video input wins.
pub fn select_reference_device<'a>(
    devices: &'a [DeviceDescriptor],
    requested: Option<&str>,
    excluded_id: &str,
) -> Option<&'a DeviceDescriptor> {
    let cameras = || {
        devices
            .iter()
            .filter(move |d| d.is_video_input() && d.id != excluded_id)
    };

    if let Some(wanted) = requested.filter(|w| !w.is_empty()) {
        let found = cameras()
            .find(|d| d.label == wanted)
            .or_else(|| cameras().find(|d| d.id == wanted));
        if found.is_some() {
            return found;
        }
        log::warn!("reference camera `{wanted}` not found, using the first camera");
    }

    cameras().next()
}
