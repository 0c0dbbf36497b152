//! Fakes shared by the unit tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::{
    device::{
        source::{DeviceIdConstraint, StreamConstraints, VideoSource},
        stream::{MediaStream, TrackHandle, TrackSender, video_track},
    },
    error::DeviceError,
    pipeline::{estimator::LandmarkEstimator, rig::Rig, skeleton::SkeletonPose},
    render::RenderTarget,
    types::{DeviceDescriptor, FaceRig, Frame, LandmarkFrame, MouthShape},
};

pub fn test_frame() -> Frame {
    Frame::filled(64, 36, [90, 120, 150, 255])
}

pub fn mouth_open_frame() -> LandmarkFrame {
    LandmarkFrame {
        face: Some(FaceRig {
            mouth: Some(MouthShape {
                a: Some(1.0),
                ..MouthShape::default()
            }),
            ..FaceRig::default()
        }),
        ..LandmarkFrame::empty()
    }
}

/// Genuine facility stand-in. Acquired tracks are fed with `emit`.
#[derive(Default)]
pub struct FakeVideoSource {
    devices: Vec<DeviceDescriptor>,
    acquisitions: AtomicUsize,
    senders: Mutex<Vec<TrackSender>>,
    handles: Mutex<Vec<TrackHandle>>,
    last_constraints: Mutex<Option<StreamConstraints>>,
}

impl FakeVideoSource {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    pub fn with_cameras(cameras: &[(&str, &str)]) -> Self {
        Self::new(
            cameras
                .iter()
                .map(|(id, label)| DeviceDescriptor::video_input(*id, *label))
                .collect(),
        )
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Handles of every track handed out, in acquisition order.
    pub fn track_handles(&self) -> Vec<TrackHandle> {
        self.handles.lock().clone()
    }

    pub fn last_constraints(&self) -> Option<StreamConstraints> {
        self.last_constraints.lock().clone()
    }

    /// Pushes a frame into every live track.
    pub fn emit(&self, frame: Frame) -> usize {
        self.senders
            .lock()
            .iter()
            .filter(|sender| sender.push(frame.clone()))
            .count()
    }
}

impl VideoSource for FakeVideoSource {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Ok(self.devices.clone())
    }

    fn acquire(&self, constraints: &StreamConstraints) -> Result<MediaStream, DeviceError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        *self.last_constraints.lock() = Some(constraints.clone());

        let cameras: Vec<&DeviceDescriptor> =
            self.devices.iter().filter(|d| d.is_video_input()).collect();
        let device = match constraints.device_id() {
            Some(wanted) => cameras
                .iter()
                .find(|d| wanted.selects(&d.id))
                .ok_or_else(|| {
                    DeviceError::NotFound(
                        wanted.preferred().unwrap_or_default().to_string(),
                    )
                })?,
            None => cameras.first().ok_or(DeviceError::NoVideoInput)?,
        };

        let (sender, track) = video_track(device.label.clone());
        self.handles.lock().push(track.handle());
        self.senders.lock().push(sender);
        Ok(MediaStream::new(vec![track]))
    }
}

/// Estimator that answers from a script instead of a model.
pub struct ScriptedEstimator {
    calls: Arc<AtomicUsize>,
    failures: Vec<usize>,
    result: LandmarkFrame,
    delay: Duration,
}

impl ScriptedEstimator {
    pub fn new() -> Self {
        Self {
            calls: Arc::default(),
            failures: Vec::new(),
            result: LandmarkFrame::empty(),
            delay: Duration::ZERO,
        }
    }

    /// Fails the calls with these zero-based indices.
    pub fn fail_on(mut self, calls: &[usize]) -> Self {
        self.failures = calls.to_vec();
        self
    }

    pub fn returning(mut self, result: LandmarkFrame) -> Self {
        self.result = result;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl LandmarkEstimator for ScriptedEstimator {
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<LandmarkFrame> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.failures.contains(&call) {
            return Err(anyhow!("scripted failure on call {call}"));
        }
        Ok(LandmarkFrame {
            timestamp: frame.timestamp,
            ..self.result.clone()
        })
    }

    fn label(&self) -> &'static str {
        "scripted"
    }
}

/// Render target that paints a flat frame and remembers the last pose.
pub struct FakeRenderTarget {
    renders: Arc<AtomicUsize>,
    last_pose: Arc<Mutex<Option<SkeletonPose>>>,
    fail_every: Option<usize>,
}

impl FakeRenderTarget {
    pub fn new() -> Self {
        Self {
            renders: Arc::default(),
            last_pose: Arc::default(),
            fail_every: None,
        }
    }

    /// Every `n`-th render after the first fails.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub fn renders(&self) -> Arc<AtomicUsize> {
        self.renders.clone()
    }

    pub fn last_pose(&self) -> Arc<Mutex<Option<SkeletonPose>>> {
        self.last_pose.clone()
    }
}

impl RenderTarget for FakeRenderTarget {
    fn rig(&self) -> Rig {
        Rig::humanoid()
    }

    fn size(&self) -> (u32, u32) {
        (640, 360)
    }

    fn render(&mut self, pose: &SkeletonPose) -> anyhow::Result<Frame> {
        let count = self.renders.fetch_add(1, Ordering::SeqCst);
        *self.last_pose.lock() = Some(pose.clone());
        if let Some(n) = self.fail_every {
            if count > 0 && count % n == 0 {
                return Err(anyhow!("scripted render failure {count}"));
            }
        }
        let mut frame = Frame::filled(640, 360, [10, 20, 30, 255]);
        frame.timestamp = Instant::now();
        Ok(frame)
    }
}

#[test]
fn scripted_estimator_counts_and_fails_on_request() {
    let mut estimator = ScriptedEstimator::new().fail_on(&[1]);
    let calls = estimator.calls();

    assert!(estimator.estimate(&test_frame()).is_ok());
    assert!(estimator.estimate(&test_frame()).is_err());
    assert!(estimator.estimate(&test_frame()).is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn fake_source_matches_constraints() {
    let source = FakeVideoSource::with_cameras(&[("a", "A"), ("b", "B")]);
    let stream = source
        .acquire(&StreamConstraints::video_device(DeviceIdConstraint::OneOf(vec![
            "x".into(),
            "b".into(),
        ])))
        .expect("stream");

    assert_eq!(stream.video_track().map(|t| t.label().to_string()), Some("B".into()));
    assert_eq!(source.emit(test_frame()), 1);
}
