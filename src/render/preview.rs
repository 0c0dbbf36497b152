use std::{collections::HashMap, time::Instant};

use anyhow::{Context, Result};
use fast_image_resize as fir;
use nalgebra::{UnitQuaternion, Vector3};

use super::{RenderTarget, draw::Canvas};
use crate::{
    pipeline::{
        rig::{Drivable, Rig},
        skeleton::{Expression, FingerBone, Joint, SkeletonPose},
    },
    types::{Finger, Frame, Side},
};

pub const PREVIEW_WIDTH: u32 = 640;
pub const PREVIEW_HEIGHT: u32 = 360;

const BACKGROUND: [u8; 4] = [0x33, 0x33, 0x33, 255];
const BONE_COLOR: [u8; 4] = [56, 189, 248, 255];
const JOINT_COLOR: [u8; 4] = [248, 113, 113, 255];
const SKIN_COLOR: [u8; 4] = [252, 211, 177, 255];
const EYE_COLOR: [u8; 4] = [245, 245, 245, 255];
const PUPIL_COLOR: [u8; 4] = [30, 30, 30, 255];
const MOUTH_COLOR: [u8; 4] = [190, 60, 70, 255];

const HEAD_RADIUS: f32 = 28.0;
const BONE_THICKNESS: i32 = 7;
const FINGER_THICKNESS: i32 = 3;

/// Software stand-in for the 3D scene: draws the avatar as a stick figure
/// over the active background.
pub struct PreviewRenderer {
    width: u32,
    height: u32,
    background: Option<Vec<u8>>,
    rig: Rig,
}

#[derive(Clone, Copy)]
struct Placement {
    position: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
}

impl Default for PreviewRenderer {
    fn default() -> Self {
        Self::new(PREVIEW_WIDTH, PREVIEW_HEIGHT)
    }
}

impl PreviewRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            background: None,
            rig: Rig::humanoid(),
        }
    }

    pub fn with_rig(mut self, rig: Rig) -> Self {
        self.rig = rig;
        self
    }

    /// Decodes an encoded image and scales it to cover the whole frame.
    pub fn with_background(mut self, encoded: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(encoded)
            .context("failed to decode background image")?
            .to_rgba8();
        let (src_w, src_h) = decoded.dimensions();

        let src_image =
            fir::images::Image::from_vec_u8(src_w, src_h, decoded.into_raw(), fir::PixelType::U8x4)?;
        let mut dst_image = fir::images::Image::new(self.width, self.height, fir::PixelType::U8x4);
        let options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear))
            .fit_into_destination(Some((0.5, 0.5)));
        fir::Resizer::new()
            .resize(&src_image, &mut dst_image, Some(&options))
            .context("background resize failed")?;

        self.background = Some(dst_image.into_vec());
        Ok(self)
    }

    fn scale(&self) -> f32 {
        self.height as f32 / PREVIEW_HEIGHT as f32
    }

    fn project(&self, p: &Vector3<f32>) -> (f32, f32) {
        let scale = self.scale();
        (
            self.width as f32 / 2.0 + p.x * scale,
            self.height as f32 * 0.8 - p.y * scale,
        )
    }

    fn shows(&self, joint: Joint) -> bool {
        (joint == Joint::Hips && self.rig.contains(joint))
            || self.rig.drivable(joint) == Drivable::Yes
    }

    /// World placement of every visible joint, parents before children.
    fn solve(&self, pose: &SkeletonPose) -> HashMap<Joint, Placement> {
        let mut placed: HashMap<Joint, Placement> = HashMap::new();
        let mut pending: Vec<Joint> = self
            .rig
            .joints()
            .copied()
            .filter(|j| self.shows(*j))
            .collect();
        pending.sort();

        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|&joint| {
                let parent = self.rig.node(joint).and_then(|n| n.parent);
                let base = match parent {
                    None => Placement {
                        position: Vector3::zeros(),
                        rotation: UnitQuaternion::identity(),
                    },
                    Some(parent) => match placed.get(&parent) {
                        Some(base) => *base,
                        None => return true,
                    },
                };
                placed.insert(
                    joint,
                    Placement {
                        position: base.position + base.rotation * rest_offset(joint),
                        rotation: base.rotation * pose.rotation(joint),
                    },
                );
                false
            });
            if pending.len() == before {
                break;
            }
        }
        placed
    }

    fn draw_figure(&self, canvas: &mut Canvas<'_>, pose: &SkeletonPose) {
        let placed = self.solve(pose);
        let scale = self.scale();

        let mut joints: Vec<_> = placed.keys().copied().collect();
        joints.sort();
        for joint in &joints {
            let Some(here) = placed.get(joint) else {
                continue;
            };
            let thickness = match joint {
                Joint::Finger(..) => FINGER_THICKNESS,
                _ => BONE_THICKNESS,
            };
            if let Some(parent) = self.rig.node(*joint).and_then(|n| n.parent) {
                if let Some(from) = placed.get(&parent) {
                    canvas.line(
                        self.project(&from.position),
                        self.project(&here.position),
                        BONE_COLOR,
                        thickness,
                    );
                }
            }
            if let Some(tip) = tip_offset(*joint) {
                let end = here.position + here.rotation * tip;
                canvas.line(
                    self.project(&here.position),
                    self.project(&end),
                    BONE_COLOR,
                    thickness,
                );
            }
        }

        for joint in &joints {
            if matches!(joint, Joint::Finger(..) | Joint::Head) {
                continue;
            }
            if let Some(here) = placed.get(joint) {
                canvas.circle(
                    self.project(&here.position),
                    (5.0 * scale) as i32,
                    JOINT_COLOR,
                );
            }
        }

        if let Some(head) = placed.get(&Joint::Head) {
            self.draw_face(canvas, head, pose);
        }
    }

    fn draw_face(&self, canvas: &mut Canvas<'_>, head: &Placement, pose: &SkeletonPose) {
        let scale = self.scale();
        let at = |offset: Vector3<f32>| {
            let center = head.position + head.rotation * Vector3::new(0.0, HEAD_RADIUS - 3.0, 0.0);
            self.project(&(center + head.rotation * offset))
        };

        canvas.circle(at(Vector3::zeros()), (HEAD_RADIUS * scale) as i32, SKIN_COLOR);

        let pupil_shift = pose.gaze_target.xy().map(|v| v.clamp(-1.0, 1.0) * 2.0);
        for (side, x) in [(Side::Left, 10.0), (Side::Right, -10.0)] {
            let blink = match side {
                Side::Left => pose.expression(Expression::BlinkLeft),
                Side::Right => pose.expression(Expression::BlinkRight),
            };
            let eye = at(Vector3::new(x, 5.0, 0.0));
            let open_ry = (5.0 * (1.0 - blink) * scale).round() as i32;
            canvas.ellipse(eye, (5.0 * scale) as i32, open_ry, EYE_COLOR);
            if open_ry > 1 {
                let pupil = at(Vector3::new(x + pupil_shift.x, 5.0 + pupil_shift.y, 0.0));
                canvas.circle(pupil, (2.0 * scale) as i32, PUPIL_COLOR);
            }
        }

        let open = pose
            .expression(Expression::Aa)
            .max(pose.expression(Expression::Oh));
        let narrow = pose
            .expression(Expression::Oh)
            .max(pose.expression(Expression::Ou));
        let rx = ((9.0 - 4.0 * narrow) * scale) as i32;
        let ry = ((1.0 + 8.0 * open) * scale) as i32;
        canvas.ellipse(at(Vector3::new(0.0, -11.0, 0.0)), rx, ry, MOUTH_COLOR);
    }
}

fn side_sign(side: Side) -> f32 {
    match side {
        Side::Left => 1.0,
        Side::Right => -1.0,
    }
}

fn finger_spread(finger: Finger) -> f32 {
    match finger {
        Finger::Thumb => 9.0,
        Finger::Index => 5.0,
        Finger::Middle => 1.0,
        Finger::Ring => -3.0,
        Finger::Little => -7.0,
    }
}

/// Offset of a joint from its parent in the rest pose. The avatar faces
/// the viewer, so its left side is drawn on the right.
fn rest_offset(joint: Joint) -> Vector3<f32> {
    match joint {
        Joint::Hips => Vector3::zeros(),
        Joint::Spine | Joint::Chest => Vector3::new(0.0, 45.0, 0.0),
        Joint::Neck => Vector3::new(0.0, 40.0, 0.0),
        Joint::Head => Vector3::new(0.0, 30.0, 0.0),
        Joint::UpperArm(side) => Vector3::new(side_sign(side) * 25.0, 35.0, 0.0),
        Joint::LowerArm(side) => Vector3::new(side_sign(side) * 50.0, 0.0, 0.0),
        Joint::Hand(side) => Vector3::new(side_sign(side) * 45.0, 0.0, 0.0),
        Joint::Finger(side, Finger::Thumb, FingerBone::Metacarpal) => {
            Vector3::new(side_sign(side) * 6.0, finger_spread(Finger::Thumb), 0.0)
        }
        Joint::Finger(side, finger, FingerBone::Proximal) if finger != Finger::Thumb => {
            Vector3::new(side_sign(side) * 10.0, finger_spread(finger), 0.0)
        }
        Joint::Finger(side, Finger::Thumb, _) => Vector3::new(side_sign(side) * 5.0, 3.0, 0.0),
        Joint::Finger(side, _, _) => Vector3::new(side_sign(side) * 7.0, 0.0, 0.0),
    }
}

/// Extension drawn past end-of-chain joints so their rotation is visible.
fn tip_offset(joint: Joint) -> Option<Vector3<f32>> {
    match joint {
        Joint::Finger(side, _, FingerBone::Distal) => {
            Some(Vector3::new(side_sign(side) * 6.0, 0.0, 0.0))
        }
        _ => None,
    }
}

impl RenderTarget for PreviewRenderer {
    fn rig(&self) -> Rig {
        self.rig.clone()
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&mut self, pose: &SkeletonPose) -> Result<Frame> {
        let mut rgba = match &self.background {
            Some(background) => background.clone(),
            None => vec![0u8; self.width as usize * self.height as usize * 4],
        };
        {
            let mut canvas = Canvas::new(&mut rgba, self.width, self.height);
            if self.background.is_none() {
                canvas.fill(BACKGROUND);
            }
            self.draw_figure(&mut canvas, pose);
        }

        Ok(Frame {
            rgba,
            width: self.width,
            height: self.height,
            timestamp: Instant::now(),
        })
    }
}
