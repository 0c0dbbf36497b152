use std::{
    sync::{Arc, OnceLock, Weak},
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use super::{
    source::{DeviceIdConstraint, StreamConstraints, VideoSource, select_reference_device},
    stream::{MediaStream, TrackHandle},
};
use crate::{
    error::DeviceError,
    pipeline::{
        estimator::{EstimatorWorker, LandmarkEstimator},
        retarget::Retargeter,
        scheduler::{FrameScheduler, SchedulerConfig, SchedulerHandle, start_scheduler},
        skeleton::SharedPose,
    },
    render::{
        RenderLoop, RenderTarget,
        surfaces::{SurfaceKind, SurfacePool},
    },
    settings::ActiveSelection,
    types::DeviceDescriptor,
};

pub const VIRTUAL_DEVICE_ID: &str = "vtuber-virtual-camera";
pub const VIRTUAL_DEVICE_LABEL: &str = "VTuber Virtual Camera";

/// The synthetic device as it appears in listings.
pub fn virtual_device() -> &'static DeviceDescriptor {
    static DEVICE: OnceLock<DeviceDescriptor> = OnceLock::new();
    DEVICE.get_or_init(|| DeviceDescriptor::video_input(VIRTUAL_DEVICE_ID, VIRTUAL_DEVICE_LABEL))
}

/// Builds the landmark estimator the first time a session needs one.
pub type EstimatorFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn LandmarkEstimator>> + Send>;

#[derive(Clone, Debug)]
pub struct EmulatorConfig {
    pub capture_fps: u32,
    pub refresh_interval: Duration,
    pub reference_width: u32,
    pub reference_height: u32,
    pub liveness_initial_delay: Duration,
    pub liveness_interval: Duration,
    pub scheduler: SchedulerConfig,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            capture_fps: 30,
            refresh_interval: Duration::from_millis(16),
            reference_width: 640,
            reference_height: 360,
            liveness_initial_delay: Duration::from_secs(1),
            liveness_interval: Duration::from_millis(100),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmulatorState {
    /// Device calls pass straight through to the genuine facility.
    Uninitialized,
    Idle,
    Active,
}

struct ReferenceCapture {
    device: DeviceDescriptor,
    stream: MediaStream,
    scheduler: Option<SchedulerHandle>,
}

impl ReferenceCapture {
    fn stop(mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        self.stream.stop();
        log::info!("reference camera `{}` released", self.device.label);
    }
}

struct Session {
    id: u64,
    /// Tags estimation jobs; bumped whenever reference capture restarts.
    generation: u64,
    reference: Option<ReferenceCapture>,
    outputs: Vec<TrackHandle>,
}

impl Session {
    /// Drops ended output handles. True once a session that had outputs has
    /// none left live.
    fn sweep_outputs(&mut self) -> bool {
        if self.outputs.is_empty() {
            return false;
        }
        self.outputs.retain(TrackHandle::is_live);
        self.outputs.is_empty()
    }
}

struct Core {
    state: EmulatorState,
    config: EmulatorConfig,
    selection: ActiveSelection,
    pose: SharedPose,
    render: Option<RenderLoop>,
    estimator_factory: Option<EstimatorFactory>,
    worker: Option<EstimatorWorker>,
    surfaces: Arc<Mutex<SurfacePool>>,
    session: Option<Session>,
    counter: u64,
}

impl Core {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Returns the id of the current session, creating it when idle.
    fn ensure_session(&mut self, genuine: &dyn VideoSource) -> u64 {
        if let Some(session) = &self.session {
            return session.id;
        }

        let id = self.next_id();
        let generation = self.next_id();
        let reference = self.start_reference(genuine, generation);
        self.session = Some(Session {
            id,
            generation,
            reference,
            outputs: Vec::new(),
        });
        self.state = EmulatorState::Active;
        log::info!("virtual camera session {id} started");
        id
    }

    fn start_reference(
        &mut self,
        genuine: &dyn VideoSource,
        generation: u64,
    ) -> Option<ReferenceCapture> {
        let devices = match genuine.enumerate() {
            Ok(devices) => devices,
            Err(err) => {
                log::error!("failed to list cameras: {err}");
                return None;
            }
        };
        let Some(device) =
            select_reference_device(&devices, self.selection.camera.as_deref(), VIRTUAL_DEVICE_ID)
                .cloned()
        else {
            log::warn!("no camera available to drive the avatar, rendering the rest pose");
            return None;
        };

        let constraints = StreamConstraints::video_device(DeviceIdConstraint::Exact(
            device.id.clone(),
        ))
        .with_size(self.config.reference_width, self.config.reference_height);
        let stream = match genuine.acquire(&constraints) {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("failed to open reference camera `{}`: {err}", device.label);
                return None;
            }
        };
        log::info!("reference camera `{}` ({}) opened", device.label, device.id);

        self.surfaces.lock().acquire(
            SurfaceKind::ReferencePreview,
            self.config.reference_width,
            self.config.reference_height,
        );
        let scheduler = self.start_scheduling(generation, &stream);

        Some(ReferenceCapture {
            device,
            stream,
            scheduler,
        })
    }

    fn start_scheduling(&mut self, generation: u64, stream: &MediaStream) -> Option<SchedulerHandle> {
        let frames = stream.video_track()?.frames();
        let rig = self.render.as_ref()?.rig().clone();

        if self.worker.is_none() {
            let factory = self.estimator_factory.as_ref()?;
            match factory() {
                Ok(estimator) => self.worker = Some(EstimatorWorker::spawn(estimator)),
                Err(err) => {
                    log::error!("landmark estimator unavailable, avatar stays idle: {err:?}");
                    return None;
                }
            }
        }
        let worker = self.worker.as_ref()?;
        let jobs = worker.submitter()?;

        self.surfaces.lock().acquire(
            SurfaceKind::LandmarkOverlay,
            self.config.reference_width,
            self.config.reference_height,
        );
        let scheduler = FrameScheduler::new(
            generation,
            &self.config.scheduler,
            worker.in_flight(),
            jobs,
            Retargeter::new(rig),
            self.pose.clone(),
        )
        .with_preview(self.surfaces.clone());

        Some(start_scheduler(
            scheduler,
            frames,
            worker.results(),
            self.config.scheduler.poll_interval,
        ))
    }

    fn stop_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Some(reference) = session.reference {
            reference.stop();
        }
        self.surfaces.lock().hide_all();
        self.pose.reset();
        if self.state == EmulatorState::Active {
            self.state = EmulatorState::Idle;
        }
        log::info!("virtual camera session {} stopped", session.id);
    }
}

/// Virtual capture device layered over a genuine video facility.
///
/// Enumeration gains the synthetic device, and acquiring it yields a stream
/// of the rendered avatar. While a session is active the reference camera
/// is captured and fed through the estimator into the avatar's pose.
pub struct VirtualCamera {
    genuine: Arc<dyn VideoSource>,
    core: Arc<Mutex<Core>>,
}

pub struct VirtualCameraBuilder {
    genuine: Arc<dyn VideoSource>,
    config: EmulatorConfig,
    selection: ActiveSelection,
    render_target: Option<Box<dyn RenderTarget>>,
    estimator: Option<EstimatorFactory>,
}

impl VirtualCameraBuilder {
    pub fn config(mut self, config: EmulatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn selection(mut self, selection: ActiveSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn render_target(mut self, target: Box<dyn RenderTarget>) -> Self {
        self.render_target = Some(target);
        self
    }

    pub fn estimator(mut self, factory: EstimatorFactory) -> Self {
        self.estimator = Some(factory);
        self
    }

    /// Creates the camera already initialised.
    pub fn build(self) -> VirtualCamera {
        let camera = VirtualCamera::new(self.genuine, self.config);
        camera.initialize(self.selection, self.estimator);
        if let Some(target) = self.render_target {
            camera.attach_render_target(target);
        }
        camera
    }
}

impl VirtualCamera {
    pub fn new(genuine: Arc<dyn VideoSource>, config: EmulatorConfig) -> Self {
        Self {
            genuine,
            core: Arc::new(Mutex::new(Core {
                state: EmulatorState::Uninitialized,
                config,
                selection: ActiveSelection::default(),
                pose: SharedPose::default(),
                render: None,
                estimator_factory: None,
                worker: None,
                surfaces: Arc::default(),
                session: None,
                counter: 0,
            })),
        }
    }

    pub fn builder(genuine: Arc<dyn VideoSource>) -> VirtualCameraBuilder {
        VirtualCameraBuilder {
            genuine,
            config: EmulatorConfig::default(),
            selection: ActiveSelection::default(),
            render_target: None,
            estimator: None,
        }
    }

    /// Starts intercepting device calls. The selection is read once here.
    pub fn initialize(&self, selection: ActiveSelection, estimator: Option<EstimatorFactory>) {
        let mut core = self.core.lock();
        if core.state != EmulatorState::Uninitialized {
            return;
        }
        core.selection = selection;
        core.estimator_factory = estimator;
        core.state = EmulatorState::Idle;
        log::info!("virtual camera `{VIRTUAL_DEVICE_LABEL}` registered");
    }

    /// Installs the scene renderer and starts the render loop.
    pub fn attach_render_target(&self, target: Box<dyn RenderTarget>) {
        let mut core = self.core.lock();
        if let Some(mut previous) = core.render.take() {
            previous.stop();
        }
        let refresh = core.config.refresh_interval;
        core.render = Some(RenderLoop::start(target, core.pose.clone(), refresh));
    }

    pub fn state(&self) -> EmulatorState {
        self.core.lock().state
    }

    pub fn pose(&self) -> SharedPose {
        self.core.lock().pose.clone()
    }

    pub fn surfaces(&self) -> Arc<Mutex<SurfacePool>> {
        self.core.lock().surfaces.clone()
    }

    /// Camera currently feeding the pipeline, if any.
    pub fn reference_device(&self) -> Option<DeviceDescriptor> {
        let core = self.core.lock();
        let reference = core.session.as_ref()?.reference.as_ref()?;
        Some(reference.device.clone())
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let initialized = self.state() != EmulatorState::Uninitialized;
        let mut devices = self.genuine.enumerate()?;
        if initialized && !devices.iter().any(|d| d.id == VIRTUAL_DEVICE_ID) {
            devices.push(virtual_device().clone());
        }
        Ok(devices)
    }

    pub fn acquire(&self, constraints: &StreamConstraints) -> Result<MediaStream, DeviceError> {
        let mut core = self.core.lock();
        if core.state == EmulatorState::Uninitialized {
            drop(core);
            return self.genuine.acquire(constraints);
        }

        let wants_virtual = constraints
            .device_id()
            .is_some_and(|id| id.selects(VIRTUAL_DEVICE_ID));
        if !wants_virtual {
            if core.state == EmulatorState::Active {
                log::info!("another camera was requested, stopping the virtual camera");
                core.stop_session();
            }
            drop(core);
            return self.genuine.acquire(constraints);
        }

        let fps = core.config.capture_fps;
        let stream = core
            .render
            .as_ref()
            .ok_or(DeviceError::RenderTargetUnavailable)?
            .capture_stream(VIRTUAL_DEVICE_LABEL, fps);

        let session_id = core.ensure_session(self.genuine.as_ref());
        let mut monitor = false;
        if let Some(session) = core.session.as_mut() {
            monitor = session.outputs.is_empty();
            session.outputs.extend(stream.handles());
        }
        let (delay, interval) = (
            core.config.liveness_initial_delay,
            core.config.liveness_interval,
        );
        drop(core);

        if monitor {
            self.spawn_liveness_monitor(session_id, delay, interval);
        }
        Ok(stream)
    }

    /// Starts reference capture without handing out a stream.
    pub fn start(&self) -> Result<(), DeviceError> {
        let mut core = self.core.lock();
        match core.state {
            EmulatorState::Uninitialized => Err(DeviceError::NotInitialized),
            EmulatorState::Active => Ok(()),
            EmulatorState::Idle => {
                if core.render.is_none() {
                    return Err(DeviceError::RenderTargetUnavailable);
                }
                core.ensure_session(self.genuine.as_ref());
                Ok(())
            }
        }
    }

    pub fn stop(&self) {
        self.core.lock().stop_session();
    }

    /// Stops everything, frees render resources and surfaces, and returns
    /// device calls to pass-through mode.
    pub fn teardown(&self) {
        let mut core = self.core.lock();
        if core.state == EmulatorState::Uninitialized {
            return;
        }
        core.stop_session();
        if let Some(mut render) = core.render.take() {
            render.stop();
        }
        if let Some(mut worker) = core.worker.take() {
            worker.shutdown();
        }
        core.surfaces.lock().destroy();
        core.state = EmulatorState::Uninitialized;
        log::info!("virtual camera removed, device calls pass through");
    }

    /// One liveness pass: an active session whose output tracks have all
    /// ended is stopped.
    pub fn check_liveness(&self) -> EmulatorState {
        let mut core = self.core.lock();
        if core.session.as_mut().is_some_and(Session::sweep_outputs) {
            log::info!("all virtual camera tracks ended");
            core.stop_session();
        }
        core.state
    }

    /// Switches the camera that drives the avatar. The virtual stream itself
    /// keeps running.
    pub fn change_reference_camera(&self, camera: &str) {
        let mut core = self.core.lock();
        let in_use = core
            .session
            .as_ref()
            .and_then(|s| s.reference.as_ref())
            .is_some_and(|r| r.device.id == camera || r.device.label == camera);
        if core.selection.camera.as_deref() == Some(camera) || in_use {
            return;
        }
        core.selection.camera = Some(camera.to_string());

        let Some(mut session) = core.session.take() else {
            return;
        };
        if let Some(reference) = session.reference.take() {
            reference.stop();
        }
        session.generation = core.next_id();
        session.reference = core.start_reference(self.genuine.as_ref(), session.generation);
        core.session = Some(session);
    }

    fn spawn_liveness_monitor(&self, session_id: u64, delay: Duration, interval: Duration) {
        let core: Weak<Mutex<Core>> = Arc::downgrade(&self.core);
        thread::spawn(move || {
            thread::sleep(delay);
            loop {
                let Some(shared) = core.upgrade() else {
                    break;
                };
                {
                    let mut guard = shared.lock();
                    match guard.session.as_mut() {
                        Some(session) if session.id == session_id => {
                            if session.sweep_outputs() {
                                log::info!("all virtual camera tracks ended");
                                guard.stop_session();
                                break;
                            }
                        }
                        _ => break,
                    }
                }
                drop(shared);
                thread::sleep(interval);
            }
        });
    }
}

impl VideoSource for VirtualCamera {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        self.list_devices()
    }

    fn acquire(&self, constraints: &StreamConstraints) -> Result<MediaStream, DeviceError> {
        VirtualCamera::acquire(self, constraints)
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        self.teardown();
    }
}
