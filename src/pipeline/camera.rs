use std::{thread, time::Instant};

use anyhow::{Result, anyhow};
use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::rgba_converter::{self, PixelFormat};
use crate::{
    device::{
        source::{StreamConstraints, VideoSource},
        stream::{MediaStream, TrackSender, video_track},
    },
    error::DeviceError,
    types::{DeviceDescriptor, Frame},
};

// Built-in macOS cameras often reject YUYV even though it is reported.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Some drivers reject their own low default rate, so ask for the fastest first.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

fn pixel_format(format: FrameFormat) -> PixelFormat {
    match format {
        FrameFormat::NV12 => PixelFormat::Nv12,
        FrameFormat::YUYV => PixelFormat::Yuyv,
        FrameFormat::MJPEG => PixelFormat::Mjpeg,
        FrameFormat::RAWRGB => PixelFormat::Rgb,
        FrameFormat::RAWBGR => PixelFormat::Bgr,
        FrameFormat::GRAY => PixelFormat::Gray,
    }
}

fn convert(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    rgba_converter::to_frame(
        pixel_format(buffer.source_frame_format()),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

/// Physical cameras reached through nokhwa. Device ids are backend indices.
#[derive(Clone, Copy, Debug, Default)]
pub struct NokhwaVideoSource;

impl NokhwaVideoSource {
    fn resolve(&self, constraints: &StreamConstraints) -> Result<DeviceDescriptor, DeviceError> {
        let cameras = self.enumerate()?;
        match constraints.device_id() {
            Some(wanted) => cameras
                .into_iter()
                .find(|camera| wanted.selects(&camera.id))
                .ok_or_else(|| {
                    DeviceError::NotFound(wanted.preferred().unwrap_or_default().to_string())
                }),
            None => cameras.into_iter().next().ok_or(DeviceError::NoVideoInput),
        }
    }
}

impl VideoSource for NokhwaVideoSource {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let cameras = query(ApiBackend::Auto).map_err(anyhow::Error::from)?;
        Ok(cameras
            .into_iter()
            .map(|info| DeviceDescriptor::video_input(info.index().to_string(), info.human_name()))
            .collect())
    }

    fn acquire(&self, constraints: &StreamConstraints) -> Result<MediaStream, DeviceError> {
        let device = self.resolve(constraints)?;
        let index = device
            .id
            .parse::<u32>()
            .map(CameraIndex::Index)
            .unwrap_or_else(|_| CameraIndex::String(device.id.clone()));

        // Fail fast before spawning the capture thread.
        drop(build_camera(index.clone())?);

        let (sender, track) = video_track(device.label.clone());
        thread::Builder::new()
            .name(format!("camera-{}", device.id))
            .spawn(move || capture_loop(index, sender))
            .map_err(anyhow::Error::from)?;

        log::info!("camera `{}` acquired", device.label);
        Ok(MediaStream::new(vec![track]))
    }
}

fn capture_loop(index: CameraIndex, sender: TrackSender) {
    let mut camera = match build_camera(index) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("failed to open camera: {err:?}");
            sender.end();
            return;
        }
    };

    while !sender.is_ended() {
        let frame_start = Instant::now();
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!(
                    "camera frame read failed (after {:?}): {err:?}",
                    frame_start.elapsed()
                );
                continue;
            }
        };

        match convert(&buffer) {
            Ok(frame) => {
                if !sender.push(frame) {
                    break;
                }
            }
            Err(err) => log::warn!("failed to decode camera frame {err:?}"),
        }
    }

    if let Err(err) = camera.stop_stream() {
        log::debug!("camera stop failed: {err:?}");
    }
    log::info!("camera capture stopped");
}
