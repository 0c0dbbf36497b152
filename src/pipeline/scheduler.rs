use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError, never, select};
use parking_lot::Mutex;

use super::{
    estimator::{EstimationJob, EstimationResult, InFlight},
    retarget::Retargeter,
    skeleton::SharedPose,
};
use crate::{
    render::{
        overlay,
        surfaces::{SurfaceKind, SurfacePool},
    },
    types::Frame,
};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Only every n-th frame notification is considered for estimation.
    pub skip_frames: u32,
    /// Minimum time between the starts of two estimation calls.
    pub min_interval: Duration,
    /// Upper bound for the retargeting step after a stall.
    pub max_delta: Duration,
    /// How often the loop re-checks cancellation when idle.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            skip_frames: 3,
            min_interval: Duration::from_millis(60),
            max_delta: Duration::from_millis(100),
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Frame-count and wall-clock throttle in front of the estimator.
#[derive(Debug)]
pub struct FrameGate {
    skip_frames: u64,
    min_interval: Duration,
    frame_count: u64,
    last_started: Option<Instant>,
}

impl FrameGate {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            skip_frames: u64::from(config.skip_frames.max(1)),
            min_interval: config.min_interval,
            frame_count: 0,
            last_started: None,
        }
    }

    /// Whether the frame arriving at `now` should be estimated. Frames seen
    /// while an estimation is outstanding are dropped without counting.
    pub fn admit(&mut self, now: Instant, busy: bool) -> bool {
        if busy {
            return false;
        }

        let on_cadence = self.frame_count % self.skip_frames == 0;
        self.frame_count += 1;
        if !on_cadence {
            return false;
        }

        match self.last_started {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => true,
        }
    }

    pub fn mark_started(&mut self, now: Instant) {
        self.last_started = Some(now);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Submitted,
    Throttled,
    Busy,
    /// The estimator is gone; the frame could not be handed over.
    Dropped,
}

/// Per-session scheduling state: decides which frames reach the
/// estimator and folds results into the shared pose.
pub struct FrameScheduler {
    generation: u64,
    gate: FrameGate,
    in_flight: InFlight,
    jobs: Sender<EstimationJob>,
    retargeter: Retargeter,
    pose: SharedPose,
    max_delta: Duration,
    last_retarget: Instant,
    preview: Option<Arc<Mutex<SurfacePool>>>,
}

impl FrameScheduler {
    pub fn new(
        generation: u64,
        config: &SchedulerConfig,
        in_flight: InFlight,
        jobs: Sender<EstimationJob>,
        retargeter: Retargeter,
        pose: SharedPose,
    ) -> Self {
        Self {
            generation,
            gate: FrameGate::new(config),
            in_flight,
            jobs,
            retargeter,
            pose,
            max_delta: config.max_delta,
            last_retarget: Instant::now(),
            preview: None,
        }
    }

    /// Mirrors every reference frame into the pool's preview surface.
    pub fn with_preview(mut self, surfaces: Arc<Mutex<SurfacePool>>) -> Self {
        self.preview = Some(surfaces);
        self
    }

    pub fn on_frame(&mut self, frame: Frame, now: Instant) -> FrameOutcome {
        if let Some(preview) = &self.preview {
            preview
                .lock()
                .present_mirrored(SurfaceKind::ReferencePreview, &frame);
        }

        let busy = self.in_flight.is_busy();
        if !self.gate.admit(now, busy) {
            return if busy {
                FrameOutcome::Busy
            } else {
                FrameOutcome::Throttled
            };
        }

        let Some(ticket) = self.in_flight.try_begin() else {
            return FrameOutcome::Busy;
        };
        self.gate.mark_started(now);

        match self.jobs.try_send(EstimationJob {
            generation: self.generation,
            frame,
            ticket,
        }) {
            Ok(()) => FrameOutcome::Submitted,
            Err(TrySendError::Full(_)) => FrameOutcome::Busy,
            Err(TrySendError::Disconnected(_)) => FrameOutcome::Dropped,
        }
    }

    /// Applies a result from this session. Returns false for results that
    /// belong to an earlier session and were discarded.
    pub fn on_result(&mut self, result: EstimationResult, now: Instant) -> bool {
        if result.generation != self.generation {
            log::debug!(
                "discarding landmark result from session {} (current {})",
                result.generation,
                self.generation
            );
            return false;
        }

        let delta = now
            .saturating_duration_since(self.last_retarget)
            .min(self.max_delta);
        self.last_retarget = now;

        if let Some(preview) = &self.preview {
            preview.lock().paint(SurfaceKind::LandmarkOverlay, |canvas| {
                overlay::draw_landmarks(canvas, &result.landmarks)
            });
        }

        let previous = self.pose.snapshot();
        let next = self
            .retargeter
            .retarget(&previous, &result.landmarks, delta.as_secs_f32());
        self.pose.commit(next);
        true
    }
}

/// Running scheduler thread. Cancelling stops the loop before it takes
/// another frame; a pending estimation is abandoned.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("frame scheduler thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub fn start_scheduler(
    mut scheduler: FrameScheduler,
    frames: Receiver<Frame>,
    results: Receiver<EstimationResult>,
    poll_interval: Duration,
) -> SchedulerHandle {
    let cancel = CancellationToken::default();
    let token = cancel.clone();

    let handle = thread::spawn(move || {
        let mut frames = frames;
        let mut reported_dropped = false;
        while !token.is_cancelled() {
            select! {
                recv(frames) -> msg => match msg {
                    Ok(frame) => {
                        let outcome = scheduler.on_frame(frame, Instant::now());
                        if outcome == FrameOutcome::Dropped && !reported_dropped {
                            reported_dropped = true;
                            log::warn!("landmark estimator is gone, frames are no longer analysed");
                        }
                    }
                    Err(_) => {
                        log::debug!("reference frames ended, waiting for cancellation");
                        frames = never();
                    }
                },
                recv(results) -> msg => {
                    if let Ok(result) = msg {
                        if token.is_cancelled() {
                            break;
                        }
                        scheduler.on_result(result, Instant::now());
                    }
                },
                default(poll_interval) => {}
            }
        }
        log::debug!("frame scheduler stopped");
    });

    SchedulerHandle {
        cancel,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;
    use nalgebra::Vector2;

    use super::*;
    use crate::{
        pipeline::{rig::Rig, skeleton::Expression},
        testing::{mouth_open_frame, test_frame},
        types::{HandRig, LandmarkFrame, Side},
    };

    fn scheduler(generation: u64) -> (FrameScheduler, Receiver<EstimationJob>, SharedPose) {
        let (job_tx, job_rx) = bounded(1);
        let pose = SharedPose::default();
        let scheduler = FrameScheduler::new(
            generation,
            &SchedulerConfig::default(),
            InFlight::default(),
            job_tx,
            Retargeter::new(Rig::humanoid()),
            pose.clone(),
        );
        (scheduler, job_rx, pose)
    }

    #[test]
    fn gate_admits_every_third_frame_when_time_allows() {
        let mut gate = FrameGate::new(&SchedulerConfig::default());
        let start = Instant::now();
        let admitted: Vec<bool> = (0..7)
            .map(|i| gate.admit(start + Duration::from_millis(100 * i), false))
            .collect();
        assert_eq!(admitted, [true, false, false, true, false, false, true]);
    }

    #[test]
    fn gate_enforces_min_interval_since_last_start() {
        let mut gate = FrameGate::new(&SchedulerConfig::default());
        let start = Instant::now();

        assert!(gate.admit(start, false));
        gate.mark_started(start);
        gate.admit(start, false);
        gate.admit(start, false);
        // On cadence, but only 30ms after the last start.
        assert!(!gate.admit(start + Duration::from_millis(30), false));
    }

    #[test]
    fn burst_of_frames_submits_at_most_a_third() {
        let (mut scheduler, job_rx, _) = scheduler(1);
        let start = Instant::now();
        let n = 30u64;
        let mut submitted = 0;

        for i in 0..n {
            // Frames 70ms apart: faster than nothing, slower than the time gate.
            let now = start + Duration::from_millis(70 * i);
            if scheduler.on_frame(test_frame(), now) == FrameOutcome::Submitted {
                submitted += 1;
                // Complete the call immediately so the guard never blocks.
                drop(job_rx.try_recv().expect("job queued"));
            }
        }

        assert!(submitted <= n.div_ceil(3));
        assert_eq!(submitted, n.div_ceil(3));
    }

    #[test]
    fn fast_frames_respect_time_gate_and_guard() {
        let (mut scheduler, job_rx, _) = scheduler(1);
        let start = Instant::now();
        let mut outstanding = None;
        let mut submitted = 0;

        for i in 0..60u64 {
            let now = start + Duration::from_millis(10 * i);
            match scheduler.on_frame(test_frame(), now) {
                FrameOutcome::Submitted => {
                    assert!(outstanding.is_none(), "overlapping estimation");
                    submitted += 1;
                    outstanding = Some(job_rx.try_recv().expect("job queued"));
                }
                FrameOutcome::Busy => assert!(outstanding.is_some()),
                _ => {}
            }
            // The estimator takes ~45ms per call.
            if i % 5 == 4 {
                outstanding = None;
            }
        }

        assert!(submitted >= 1);
        assert!(submitted <= 60u64.div_ceil(3));
    }

    #[test]
    fn frame_while_busy_is_skipped_not_queued() {
        let (mut scheduler, job_rx, _) = scheduler(1);
        let start = Instant::now();

        assert_eq!(scheduler.on_frame(test_frame(), start), FrameOutcome::Submitted);
        let job = job_rx.try_recv().expect("job");
        // Eight busy frames would put a counting gate back on cadence.
        for i in 1..9 {
            let now = start + Duration::from_secs(i);
            assert_eq!(scheduler.on_frame(test_frame(), now), FrameOutcome::Busy);
        }
        assert!(job_rx.try_recv().is_err());

        drop(job);
        let later = start + Duration::from_secs(20);
        let outcomes: Vec<FrameOutcome> = (0..3)
            .map(|i| scheduler.on_frame(test_frame(), later + Duration::from_secs(i)))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                FrameOutcome::Throttled,
                FrameOutcome::Throttled,
                FrameOutcome::Submitted
            ]
        );
        assert!(job_rx.try_recv().is_ok());
    }

    #[test]
    fn result_is_retargeted_into_shared_pose() {
        let (mut scheduler, _job_rx, pose) = scheduler(4);
        let later = Instant::now() + Duration::from_secs(1);

        let applied = scheduler.on_result(
            EstimationResult {
                generation: 4,
                landmarks: mouth_open_frame(),
            },
            later,
        );

        assert!(applied);
        // A 1s gap is clamped to 100ms, so rate 12 saturates at the target.
        assert!((pose.snapshot().expression(Expression::Aa) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn result_hands_are_drawn_into_the_overlay() {
        let surfaces = Arc::new(Mutex::new(SurfacePool::default()));
        surfaces.lock().acquire(SurfaceKind::LandmarkOverlay, 640, 360);
        let (scheduler, _job_rx, _pose) = scheduler(3);
        let mut scheduler = scheduler.with_preview(surfaces.clone());

        let mut hand = HandRig::new(Side::Left);
        hand.keypoints = (0..21)
            .map(|i| Vector2::new(0.25, 0.5 - 0.01 * i as f32))
            .collect();
        let landmarks = LandmarkFrame {
            right_hand: Some(hand),
            ..LandmarkFrame::empty()
        };
        assert!(scheduler.on_result(EstimationResult { generation: 3, landmarks }, Instant::now()));

        let pool = surfaces.lock();
        let wrist = pool.pixel(SurfaceKind::LandmarkOverlay, 480, 180).expect("pixel");
        assert_eq!(wrist[3], 255);
        assert_eq!(pool.pixel(SurfaceKind::LandmarkOverlay, 160, 180), Some([0, 0, 0, 0]));
    }

    #[test]
    fn stale_result_is_discarded() {
        let (mut scheduler, _job_rx, pose) = scheduler(2);

        let applied = scheduler.on_result(
            EstimationResult {
                generation: 1,
                landmarks: mouth_open_frame(),
            },
            Instant::now(),
        );

        assert!(!applied);
        assert!(pose.snapshot().is_rest());
    }

    #[test]
    fn cancel_is_idempotent_and_stops_thread() {
        let (scheduler, _job_rx, _) = scheduler(1);
        let (_frame_tx, frame_rx) = bounded::<Frame>(1);
        let (_result_tx, result_rx) = bounded::<EstimationResult>(1);

        let mut handle = start_scheduler(
            scheduler,
            frame_rx,
            result_rx,
            Duration::from_millis(5),
        );
        assert!(handle.is_running());

        handle.cancel();
        handle.cancel();
        assert!(!handle.is_running());
    }

    #[test]
    fn scheduler_survives_end_of_frames() {
        let (scheduler, _job_rx, _) = scheduler(1);
        let (frame_tx, frame_rx) = bounded::<Frame>(1);
        let (_result_tx, result_rx) = bounded::<EstimationResult>(1);

        let mut handle = start_scheduler(
            scheduler,
            frame_rx,
            result_rx,
            Duration::from_millis(5),
        );
        drop(frame_tx);
        thread::sleep(Duration::from_millis(30));

        assert!(handle.is_running());
        handle.cancel();
    }
}
