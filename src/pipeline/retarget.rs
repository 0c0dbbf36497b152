use std::collections::HashSet;

use nalgebra::{UnitQuaternion, Vector3};

use super::{
    rig::{Drivable, Rig},
    skeleton::{Expression, FingerBone, HAND_SEGMENTS, Joint, SkeletonPose},
};
use crate::types::{
    AxisAngles, FaceRig, Finger, HandRig, LandmarkFrame, Phalanx, PoseRig, Side, Vowel,
};

pub const EXPRESSION_RATE: f32 = 12.0;
pub const HEAD_RATE: f32 = 5.0;
pub const LIMB_RATE: f32 = 5.0;
pub const TORSO_RATE: f32 = 1.0;
pub const HAND_RATE: f32 = 12.0;
pub const GAZE_RATE: f32 = 5.0;

/// Longest step a single pass may take; longer gaps are treated as this.
pub const MAX_DELTA_SECS: f32 = 0.1;

const UNIT_WEIGHTS: Vector3<f32> = Vector3::new(1.0, 1.0, 1.0);
const TORSO_WEIGHTS: Vector3<f32> = Vector3::new(0.3, 0.3, 0.3);
const HEAD_WEIGHTS: Vector3<f32> = Vector3::new(0.7, 0.7, 0.7);

#[derive(Clone, Copy, Debug)]
enum FaceChannel {
    Mouth(Vowel),
    EyeOpen(Side),
}

impl FaceChannel {
    fn resolve(self, face: &FaceRig) -> Option<f32> {
        match self {
            FaceChannel::Mouth(vowel) => face.mouth.as_ref()?.vowel(vowel),
            FaceChannel::EyeOpen(Side::Left) => face.eye.as_ref()?.l,
            FaceChannel::EyeOpen(Side::Right) => face.eye.as_ref()?.r,
        }
    }
}

struct ExpressionBinding {
    expression: Expression,
    channel: FaceChannel,
    invert: bool,
}

const EXPRESSION_BINDINGS: [ExpressionBinding; 7] = [
    ExpressionBinding {
        expression: Expression::Aa,
        channel: FaceChannel::Mouth(Vowel::A),
        invert: false,
    },
    ExpressionBinding {
        expression: Expression::Ih,
        channel: FaceChannel::Mouth(Vowel::I),
        invert: false,
    },
    ExpressionBinding {
        expression: Expression::Ee,
        channel: FaceChannel::Mouth(Vowel::E),
        invert: false,
    },
    ExpressionBinding {
        expression: Expression::Oh,
        channel: FaceChannel::Mouth(Vowel::O),
        invert: false,
    },
    ExpressionBinding {
        expression: Expression::Ou,
        channel: FaceChannel::Mouth(Vowel::U),
        invert: false,
    },
    ExpressionBinding {
        expression: Expression::BlinkLeft,
        channel: FaceChannel::EyeOpen(Side::Left),
        invert: true,
    },
    ExpressionBinding {
        expression: Expression::BlinkRight,
        channel: FaceChannel::EyeOpen(Side::Right),
        invert: true,
    },
];

/// Where a rig finger segment reads its rotation from in a hand result.
/// Rigs name the first thumb segment "metacarpal" while hand results call
/// it "intermediate".
fn source_segment(finger: Finger, bone: FingerBone) -> (Finger, Phalanx) {
    let phalanx = match (finger, bone) {
        (Finger::Thumb, FingerBone::Metacarpal) => Phalanx::Intermediate,
        (_, FingerBone::Metacarpal) | (_, FingerBone::Proximal) => Phalanx::Proximal,
        (_, FingerBone::Intermediate) => Phalanx::Intermediate,
        (_, FingerBone::Distal) => Phalanx::Distal,
    };
    (finger, phalanx)
}

pub fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

/// Interpolation factor for an exponential approach at `rate` per second.
fn factor(rate: f32, delta: f32) -> f32 {
    (rate * delta).clamp(0.0, 1.0)
}

/// Rotation for axis angles applied in X, Y, Z order.
pub fn rotation_from_axis_angles(angles: &AxisAngles) -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), angles.x)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angles.y)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angles.z)
}

pub fn smooth_rotation(
    current: &UnitQuaternion<f32>,
    target: &UnitQuaternion<f32>,
    t: f32,
) -> UnitQuaternion<f32> {
    let t = t.clamp(0.0, 1.0);
    // try_slerp gives up on nearly parallel inputs; nlerp is exact enough there.
    current
        .try_slerp(target, t, 1.0e-6)
        .unwrap_or_else(|| current.nlerp(target, t))
}

/// Maps landmark results onto a skeleton pose for one avatar rig.
pub struct Retargeter {
    rig: Rig,
    reported_missing: HashSet<Joint>,
}

impl Retargeter {
    pub fn new(rig: Rig) -> Self {
        Self {
            rig,
            reported_missing: HashSet::new(),
        }
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    /// Produces the next pose from `previous`, moving every driven value a
    /// `delta`-seconds step toward the targets in `frame`.
    pub fn retarget(
        &mut self,
        previous: &SkeletonPose,
        frame: &LandmarkFrame,
        delta: f32,
    ) -> SkeletonPose {
        let delta = if delta.is_finite() {
            delta.clamp(0.0, MAX_DELTA_SECS)
        } else {
            0.0
        };
        let mut pose = previous.clone();

        if let Some(face) = &frame.face {
            apply_expressions(&mut pose, face, delta);
            self.apply_head(&mut pose, face, delta);
            apply_gaze(&mut pose, face, delta);
        }

        if let Some(body) = &frame.pose {
            self.apply_body(&mut pose, body, delta);
        }

        // The reference feed is shown mirrored, so each detected hand drives
        // the opposite side of the avatar.
        if let Some(hand) = &frame.left_hand {
            self.apply_hand(&mut pose, Side::Right, frame.pose.as_ref(), hand, delta);
        }
        if let Some(hand) = &frame.right_hand {
            self.apply_hand(&mut pose, Side::Left, frame.pose.as_ref(), hand, delta);
        }

        pose
    }

    fn apply_head(&mut self, pose: &mut SkeletonPose, face: &FaceRig, delta: f32) {
        if let Some(head) = &face.head {
            self.rotate_joint(pose, Joint::Neck, head, &HEAD_WEIGHTS, factor(HEAD_RATE, delta));
        }
    }

    fn apply_body(&mut self, pose: &mut SkeletonPose, body: &PoseRig, delta: f32) {
        if let Some(spine) = &body.spine {
            let t = factor(TORSO_RATE, delta);
            self.rotate_joint(pose, Joint::Chest, spine, &TORSO_WEIGHTS, t);
            self.rotate_joint(pose, Joint::Spine, spine, &TORSO_WEIGHTS, t);
        }

        let t = factor(LIMB_RATE, delta);
        for side in [Side::Left, Side::Right] {
            if let Some(upper) = body.upper_arm(side) {
                self.rotate_joint(pose, Joint::UpperArm(side), upper, &UNIT_WEIGHTS, t);
            }
            if let Some(lower) = body.lower_arm(side) {
                self.rotate_joint(pose, Joint::LowerArm(side), lower, &UNIT_WEIGHTS, t);
            }
        }
    }

    fn apply_hand(
        &mut self,
        pose: &mut SkeletonPose,
        side: Side,
        body: Option<&PoseRig>,
        hand: &HandRig,
        delta: f32,
    ) {
        let t = factor(HAND_RATE, delta);

        if let Some(wrist) = &hand.wrist {
            let twist = body.and_then(|b| b.hand(side)).map(|h| h.z).unwrap_or(0.0);
            let root = Vector3::new(wrist.x, wrist.y, twist);
            self.rotate_joint(pose, Joint::Hand(side), &root, &UNIT_WEIGHTS, t);
        }

        for &(finger, bone) in HAND_SEGMENTS.iter() {
            let (src_finger, phalanx) = source_segment(finger, bone);
            if let Some(angles) = hand.segment(src_finger, phalanx) {
                self.rotate_joint(
                    pose,
                    Joint::Finger(side, finger, bone),
                    angles,
                    &UNIT_WEIGHTS,
                    t,
                );
            }
        }
    }

    fn rotate_joint(
        &mut self,
        pose: &mut SkeletonPose,
        joint: Joint,
        angles: &AxisAngles,
        weights: &Vector3<f32>,
        t: f32,
    ) {
        match self.rig.drivable(joint) {
            Drivable::Yes => {}
            Drivable::Detached => return,
            Drivable::Missing => {
                if self.reported_missing.insert(joint) {
                    log::warn!("avatar has no {joint} joint, skipping it");
                }
                return;
            }
        }

        let target = rotation_from_axis_angles(&angles.component_mul(weights));
        let next = smooth_rotation(&pose.rotation(joint), &target, t);
        pose.set_rotation(joint, next);
    }
}

fn apply_expressions(pose: &mut SkeletonPose, face: &FaceRig, delta: f32) {
    let t = factor(EXPRESSION_RATE, delta);
    for binding in EXPRESSION_BINDINGS.iter() {
        let Some(value) = binding.channel.resolve(face) else {
            continue;
        };
        let target = if binding.invert { 1.0 - value } else { value };
        let current = pose.expression(binding.expression);
        pose.set_expression(binding.expression, lerp(current, target, t));
    }
}

fn apply_gaze(pose: &mut SkeletonPose, face: &FaceRig, delta: f32) {
    if let Some(pupil) = &face.pupil {
        let destination = Vector3::new(2.0 * pupil.x, 2.0 * pupil.y, 0.0);
        pose.gaze_target = pose
            .gaze_target
            .lerp(&destination, factor(GAZE_RATE, delta));
    }
}
