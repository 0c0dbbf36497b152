pub mod draw;
pub mod overlay;
pub mod preview;
pub mod surfaces;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::RwLock;

use crate::{
    device::stream::{MediaStream, video_track},
    pipeline::{rig::Rig, skeleton::SharedPose, skeleton::SkeletonPose},
    types::Frame,
};

pub use preview::PreviewRenderer;

/// Something that turns a skeleton pose into a frame buffer.
pub trait RenderTarget: Send + 'static {
    /// Joints the avatar actually has.
    fn rig(&self) -> Rig;

    fn size(&self) -> (u32, u32);

    fn render(&mut self, pose: &SkeletonPose) -> anyhow::Result<Frame>;
}

/// Most recently rendered frame.
#[derive(Clone, Debug, Default)]
pub struct FrameSlot {
    latest: Arc<RwLock<Option<Arc<Frame>>>>,
}

impl FrameSlot {
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.read().clone()
    }

    fn publish(&self, frame: Frame) {
        *self.latest.write() = Some(Arc::new(frame));
    }
}

/// Render thread running at display cadence, independent of estimation.
pub struct RenderLoop {
    slot: FrameSlot,
    rig: Rig,
    size: (u32, u32),
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RenderLoop {
    pub fn start(mut target: Box<dyn RenderTarget>, pose: SharedPose, refresh: Duration) -> Self {
        let slot = FrameSlot::default();
        let rig = target.rig();
        let size = target.size();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_flag = stop.clone();
        let out = slot.clone();
        let handle = thread::spawn(move || {
            let mut failures = 0u64;
            while !stop_flag.load(Ordering::Relaxed) {
                let tick = Instant::now();
                let snapshot = pose.snapshot();
                match target.render(&snapshot) {
                    Ok(frame) => {
                        if failures > 0 {
                            log::info!("rendering recovered after {failures} failed frames");
                            failures = 0;
                        }
                        out.publish(frame);
                    }
                    Err(err) => {
                        if failures == 0 {
                            log::warn!("avatar render failed, keeping last frame: {err:?}");
                        }
                        failures += 1;
                    }
                }
                if let Some(rest) = refresh.checked_sub(tick.elapsed()) {
                    thread::sleep(rest);
                }
            }
            log::debug!("render loop stopped");
        });

        Self {
            slot,
            rig,
            size,
            stop,
            handle: Some(handle),
        }
    }

    pub fn slot(&self) -> FrameSlot {
        self.slot.clone()
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    /// Captures the rendered output as a live stream at `fps`. Each call
    /// produces an independent stream; all of them end when the loop stops.
    pub fn capture_stream(&self, label: &str, fps: u32) -> MediaStream {
        let (sender, track) = video_track(label);
        let slot = self.slot.clone();
        let stop = self.stop.clone();
        let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));

        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) && !sender.is_ended() {
                let tick = Instant::now();
                if let Some(frame) = slot.latest() {
                    let mut frame = Frame::clone(&frame);
                    frame.timestamp = tick;
                    if !sender.push(frame) {
                        break;
                    }
                }
                if let Some(rest) = interval.checked_sub(tick.elapsed()) {
                    thread::sleep(rest);
                }
            }
            sender.end();
            log::debug!("render capture ended");
        });

        MediaStream::new(vec![track])
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("render thread panicked");
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::skeleton::Expression,
        testing::FakeRenderTarget,
    };

    const REFRESH: Duration = Duration::from_millis(2);

    #[test]
    fn renders_rest_pose_before_any_landmarks() {
        let target = FakeRenderTarget::new();
        let seen = target.last_pose();
        let mut render = RenderLoop::start(Box::new(target), SharedPose::default(), REFRESH);

        let stream = render.capture_stream("virtual", 30);
        let frame = stream
            .video_track()
            .and_then(|t| t.recv_timeout(Duration::from_secs(2)))
            .expect("frame");

        assert_eq!((frame.width, frame.height), (640, 360));
        assert!(seen.lock().as_ref().is_some_and(SkeletonPose::is_rest));
        render.stop();
    }

    #[test]
    fn latest_committed_pose_is_rendered() {
        let target = FakeRenderTarget::new();
        let seen = target.last_pose();
        let pose = SharedPose::default();
        let mut render = RenderLoop::start(Box::new(target), pose.clone(), REFRESH);

        let mut next = SkeletonPose::rest();
        next.set_expression(Expression::Aa, 0.5);
        pose.commit(next);

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if seen
                .lock()
                .as_ref()
                .is_some_and(|p| p.expression(Expression::Aa) == 0.5)
            {
                break;
            }
            thread::sleep(REFRESH);
        }
        assert_eq!(
            seen.lock().as_ref().map(|p| p.expression(Expression::Aa)),
            Some(0.5)
        );
        render.stop();
    }

    #[test]
    fn render_failures_do_not_stop_the_loop() {
        let target = FakeRenderTarget::new().failing_every(2);
        let renders = target.renders();
        let mut render = RenderLoop::start(Box::new(target), SharedPose::default(), REFRESH);

        let deadline = Instant::now() + Duration::from_secs(2);
        while renders.load(Ordering::SeqCst) < 6 && Instant::now() < deadline {
            thread::sleep(REFRESH);
        }

        assert!(renders.load(Ordering::SeqCst) >= 6);
        assert!(render.slot().latest().is_some());
        render.stop();
    }

    #[test]
    fn stopping_the_loop_ends_capture_streams() {
        let mut render =
            RenderLoop::start(Box::new(FakeRenderTarget::new()), SharedPose::default(), REFRESH);
        let stream = render.capture_stream("virtual", 60);
        let handle = stream.handles().remove(0);

        render.stop();
        render.stop();

        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.is_live() && Instant::now() < deadline {
            thread::sleep(REFRESH);
        }
        assert!(!handle.is_live());
    }
}
