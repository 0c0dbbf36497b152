use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use avatar_cam::{
    StreamConstraints, VirtualCamera,
    device::{
        DeviceIdConstraint, EmulatorConfig, ReadyState, VIRTUAL_DEVICE_ID, VideoSource,
    },
    pipeline::{EstimatorConfig, LandmarkEstimator, OrtHandEstimator},
    render::PreviewRenderer,
    settings::{
        ACTIVE_BACKGROUND_KEY, ACTIVE_CAMERA_KEY, ActiveSelection, AssetStore, MemoryAssets,
        MemorySettings, SettingsStore, background_key,
    },
    types::Frame,
};

fn genuine_source() -> Arc<dyn VideoSource> {
    #[cfg(feature = "camera-nokhwa")]
    {
        Arc::new(avatar_cam::pipeline::NokhwaVideoSource)
    }
    #[cfg(not(feature = "camera-nokhwa"))]
    {
        Arc::new(avatar_cam::device::NullVideoSource)
    }
}

fn load_settings(settings: &MemorySettings, assets: &MemoryAssets) -> Result<()> {
    if let Ok(camera) = env::var("AVATAR_CAM_CAMERA") {
        settings.set(ACTIVE_CAMERA_KEY, &camera);
    }
    if let Ok(path) = env::var("AVATAR_CAM_BACKGROUND") {
        let path = PathBuf::from(path);
        let bytes = fs::read(&path)
            .with_context(|| format!("failed to read background {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("custom")
            .to_string();
        assets.put(&background_key(&name), bytes);
        settings.set(ACTIVE_BACKGROUND_KEY, &name);
    }
    Ok(())
}

fn save_snapshot(frame: &Frame, path: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| anyhow!("frame buffer does not match its size"))?;
    image
        .save(path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    log::info!("snapshot written to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let settings = MemorySettings::default();
    let assets = MemoryAssets::default();
    load_settings(&settings, &assets)?;
    let selection = ActiveSelection::load(&settings);

    let mut renderer = PreviewRenderer::default();
    if let Some(bytes) = selection.background_bytes(&assets) {
        renderer = renderer.with_background(&bytes)?;
    }

    let mut estimator_config = EstimatorConfig::default();
    if let Ok(path) = env::var("AVATAR_CAM_MODEL") {
        estimator_config.model_path = PathBuf::from(path);
    }

    let camera = VirtualCamera::builder(genuine_source())
        .config(EmulatorConfig::default())
        .selection(selection)
        .render_target(Box::new(renderer))
        .estimator(Box::new(move || {
            let estimator = OrtHandEstimator::new(estimator_config.clone())?;
            Ok(Box::new(estimator) as Box<dyn LandmarkEstimator>)
        }))
        .build();

    for device in camera.list_devices()? {
        log::info!("{} `{}` ({})", device.kind.as_str(), device.label, device.id);
    }

    let seconds = env::var("AVATAR_CAM_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(10);

    let stream = camera.acquire(&StreamConstraints::video_device(DeviceIdConstraint::Exact(
        VIRTUAL_DEVICE_ID.to_string(),
    )))?;
    let track = stream
        .video_track()
        .ok_or_else(|| anyhow!("virtual stream has no video track"))?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut frames = 0usize;
    let mut last = None;
    while Instant::now() < deadline {
        if track.ready_state() == ReadyState::Ended {
            log::warn!("virtual stream ended early");
            break;
        }
        if let Some(frame) = track.recv_timeout(Duration::from_millis(200)) {
            frames += 1;
            last = Some(frame);
        }
    }
    log::info!("received {frames} avatar frames in {seconds}s");

    if let (Ok(path), Some(frame)) = (env::var("AVATAR_CAM_SNAPSHOT"), last.as_ref()) {
        save_snapshot(frame, Path::new(&path))?;
    }

    stream.stop();
    camera.teardown();
    Ok(())
}
