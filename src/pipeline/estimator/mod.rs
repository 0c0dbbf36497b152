mod common;
mod hand_solver;
mod ort;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::{
    model_download::default_handpose_model_path,
    types::{Frame, LandmarkFrame},
};

pub use self::ort::OrtHandEstimator;

/// Black-box landmark estimator. Implementations may take as long as they
/// need; the worker never runs two calls at once.
pub trait LandmarkEstimator: Send + 'static {
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<LandmarkFrame>;

    fn label(&self) -> &'static str {
        "estimator"
    }
}

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ModelComplexity {
    #[default]
    Lite,
    Full,
}

#[derive(Clone, Debug)]
pub struct EstimatorConfig {
    pub model_path: PathBuf,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub complexity: ModelComplexity,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            model_path: default_handpose_model_path(),
            min_detection_confidence: 0.8,
            min_tracking_confidence: 0.8,
            complexity: ModelComplexity::Lite,
        }
    }
}

/// Guard admitting at most one outstanding estimation.
#[derive(Clone, Debug, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
}

/// Held for the duration of one estimation; releases the guard on drop.
#[derive(Debug)]
pub struct InFlightTicket {
    busy: Arc<AtomicBool>,
}

impl InFlight {
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn try_begin(&self) -> Option<InFlightTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightTicket {
                busy: self.busy.clone(),
            })
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct EstimationJob {
    pub generation: u64,
    pub frame: Frame,
    pub ticket: InFlightTicket,
}

#[derive(Debug)]
pub struct EstimationResult {
    pub generation: u64,
    pub landmarks: LandmarkFrame,
}

/// Thread that owns the estimator and serves one job at a time.
pub struct EstimatorWorker {
    job_tx: Option<Sender<EstimationJob>>,
    result_rx: Receiver<EstimationResult>,
    in_flight: InFlight,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EstimatorWorker {
    pub fn spawn(estimator: Box<dyn LandmarkEstimator>) -> Self {
        let (job_tx, job_rx) = bounded::<EstimationJob>(1);
        let (result_tx, result_rx) = bounded::<EstimationResult>(1);
        log::info!("starting landmark estimator: {}", estimator.label());

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle =
            thread::spawn(move || run_worker_loop(estimator, job_rx, result_tx, stop_flag));

        Self {
            job_tx: Some(job_tx),
            result_rx,
            in_flight: InFlight::default(),
            stop,
            handle: Some(handle),
        }
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    pub fn results(&self) -> Receiver<EstimationResult> {
        self.result_rx.clone()
    }

    pub fn submitter(&self) -> Option<Sender<EstimationJob>> {
        self.job_tx.clone()
    }

    /// Stops accepting jobs. A call that is still running is abandoned: its
    /// thread finishes on its own and the result is never read.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.job_tx = None;
        if let Some(handle) = self.handle.take() {
            if self.in_flight.is_busy() {
                log::debug!("leaving in-flight estimation to finish in the background");
                return;
            }
            if handle.join().is_err() {
                log::warn!("landmark estimator thread panicked");
            }
        }
    }
}

impl Drop for EstimatorWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker_loop(
    mut estimator: Box<dyn LandmarkEstimator>,
    job_rx: Receiver<EstimationJob>,
    result_tx: Sender<EstimationResult>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let job = match job_rx.recv_timeout(WORKER_POLL_INTERVAL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let EstimationJob {
            generation,
            frame,
            ticket,
        } = job;
        let started = Instant::now();
        let outcome = estimator.estimate(&frame);
        drop(ticket);

        if stop.load(Ordering::Relaxed) {
            break;
        }

        match outcome {
            Ok(landmarks) => {
                log::trace!(
                    "estimation took {:?}: {landmarks}",
                    started.elapsed()
                );
                match result_tx.try_send(EstimationResult {
                    generation,
                    landmarks,
                }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::debug!("dropping landmark result, previous one not consumed yet");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(err) => {
                log::warn!("landmark estimation failed: {err:?}");
            }
        }
    }
}
