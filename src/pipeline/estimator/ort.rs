use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use nalgebra::Vector2;
use ort::value::Tensor;

use super::{
    EstimatorConfig, LandmarkEstimator, ModelComplexity,
    common::{self, INPUT_SIZE},
    hand_solver::solve_detected_hand,
};
use crate::{
    model_download::{ModelDownloadEvent, ensure_model_ready},
    types::{Frame, LandmarkFrame, Side},
};

/// Hand-only estimator running the MediaPipe hand-pose model through ONNX
/// Runtime. Face and body results are never produced.
pub struct OrtHandEstimator {
    session: Session,
    config: EstimatorConfig,
    tracking: bool,
}

impl OrtHandEstimator {
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        ensure_model_ready(&config.model_path, |event| {
            if let ModelDownloadEvent::Finished = event {
                log::debug!("handpose model available");
            }
        })?;

        let threads = match config.complexity {
            ModelComplexity::Lite => 1,
            ModelComplexity::Full => 2,
        };
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(&config.model_path)
            .with_context(|| {
                format!(
                    "failed to load ORT session from {}",
                    config.model_path.display()
                )
            })?;

        log::info!(
            "handpose ORT estimator ready using {}",
            config.model_path.display()
        );

        Ok(Self {
            session,
            config,
            tracking: false,
        })
    }

    /// While a hand is being tracked the (usually looser) tracking threshold
    /// applies; re-acquiring a lost hand needs the detection threshold.
    fn threshold(&self) -> f32 {
        if self.tracking {
            self.config.min_tracking_confidence
        } else {
            self.config.min_detection_confidence
        }
    }
}

impl LandmarkEstimator for OrtHandEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<LandmarkFrame> {
        let (input, letterbox) = common::letterbox_input(frame, INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let (landmarks, confidence, handedness) = {
            let outputs = self
                .session
                .run(ort::inputs![tensor])
                .context("failed to run ORT session")?;

            if outputs.len() < 1 {
                return Err(anyhow!("model returned no outputs"));
            }

            let coords = outputs[0].try_extract_array::<f32>()?;
            let flattened: Vec<f32> = coords.iter().copied().collect();
            let landmarks = common::decode_landmarks(&flattened, &letterbox)?;

            let scalar = |idx: usize| {
                if outputs.len() > idx {
                    outputs[idx]
                        .try_extract_array::<f32>()
                        .ok()
                        .and_then(|arr| arr.iter().next().copied())
                        .unwrap_or(0.0)
                } else {
                    0.0
                }
            };
            (landmarks, scalar(1).clamp(0.0, 1.0), scalar(2))
        };

        let mut result = LandmarkFrame {
            timestamp: frame.timestamp,
            ..LandmarkFrame::empty()
        };

        if confidence < self.threshold() {
            self.tracking = false;
            return Ok(result);
        }
        self.tracking = true;

        let side = if handedness >= 0.5 {
            Side::Right
        } else {
            Side::Left
        };
        let (width, height) = (frame.width.max(1) as f32, frame.height.max(1) as f32);
        let hand = solve_detected_hand(&landmarks, side).map(|mut hand| {
            hand.keypoints = landmarks
                .iter()
                .map(|p| Vector2::new(p.x / width, p.y / height))
                .collect();
            hand
        });
        match side {
            Side::Left => result.left_hand = hand,
            Side::Right => result.right_hand = hand,
        }

        log::trace!(
            "hand detected ({}) confidence {confidence:.2} at {:?}",
            side.label(),
            Instant::now().duration_since(frame.timestamp)
        );
        Ok(result)
    }

    fn label(&self) -> &'static str {
        "ort-handpose"
    }
}
