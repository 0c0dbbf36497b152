use std::{collections::BTreeMap, fmt, sync::Arc};

use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::RwLock;

use crate::types::{Finger, Side};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FingerBone {
    Metacarpal,
    Proximal,
    Intermediate,
    Distal,
}

impl FingerBone {
    pub fn label(&self) -> &'static str {
        match self {
            FingerBone::Metacarpal => "Metacarpal",
            FingerBone::Proximal => "Proximal",
            FingerBone::Intermediate => "Intermediate",
            FingerBone::Distal => "Distal",
        }
    }
}

/// Humanoid joints the retargeter can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Joint {
    Hips,
    Spine,
    Chest,
    Neck,
    Head,
    UpperArm(Side),
    LowerArm(Side),
    Hand(Side),
    Finger(Side, Finger, FingerBone),
}

/// The 15 finger segments driven per hand, in application order.
pub const HAND_SEGMENTS: [(Finger, FingerBone); 15] = [
    (Finger::Ring, FingerBone::Proximal),
    (Finger::Ring, FingerBone::Intermediate),
    (Finger::Ring, FingerBone::Distal),
    (Finger::Index, FingerBone::Proximal),
    (Finger::Index, FingerBone::Intermediate),
    (Finger::Index, FingerBone::Distal),
    (Finger::Middle, FingerBone::Proximal),
    (Finger::Middle, FingerBone::Intermediate),
    (Finger::Middle, FingerBone::Distal),
    (Finger::Thumb, FingerBone::Proximal),
    (Finger::Thumb, FingerBone::Metacarpal),
    (Finger::Thumb, FingerBone::Distal),
    (Finger::Little, FingerBone::Proximal),
    (Finger::Little, FingerBone::Intermediate),
    (Finger::Little, FingerBone::Distal),
];

pub fn finger_joints(side: Side) -> impl Iterator<Item = Joint> {
    HAND_SEGMENTS
        .iter()
        .map(move |&(finger, bone)| Joint::Finger(side, finger, bone))
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Joint::Hips => f.write_str("hips"),
            Joint::Spine => f.write_str("spine"),
            Joint::Chest => f.write_str("chest"),
            Joint::Neck => f.write_str("neck"),
            Joint::Head => f.write_str("head"),
            Joint::UpperArm(side) => write!(f, "{}UpperArm", side.label()),
            Joint::LowerArm(side) => write!(f, "{}LowerArm", side.label()),
            Joint::Hand(side) => write!(f, "{}Hand", side.label()),
            Joint::Finger(side, finger, bone) => {
                write!(f, "{}{}{}", side.label(), finger.label(), bone.label())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expression {
    Aa,
    Ih,
    Ee,
    Oh,
    Ou,
    BlinkLeft,
    BlinkRight,
}

/// Target rotations, expression weights and gaze for one avatar.
///
/// Joints and expressions that were never written read back as the rest
/// value (identity rotation, zero weight).
#[derive(Clone, Debug, PartialEq)]
pub struct SkeletonPose {
    joints: BTreeMap<Joint, UnitQuaternion<f32>>,
    expressions: BTreeMap<Expression, f32>,
    pub gaze_target: Vector3<f32>,
}

impl Default for SkeletonPose {
    fn default() -> Self {
        Self::rest()
    }
}

impl SkeletonPose {
    pub fn rest() -> Self {
        Self {
            joints: BTreeMap::new(),
            expressions: BTreeMap::new(),
            gaze_target: Vector3::zeros(),
        }
    }

    pub fn rotation(&self, joint: Joint) -> UnitQuaternion<f32> {
        self.joints
            .get(&joint)
            .copied()
            .unwrap_or_else(UnitQuaternion::identity)
    }

    pub fn set_rotation(&mut self, joint: Joint, rotation: UnitQuaternion<f32>) {
        self.joints.insert(joint, rotation);
    }

    pub fn expression(&self, expression: Expression) -> f32 {
        self.expressions.get(&expression).copied().unwrap_or(0.0)
    }

    pub fn set_expression(&mut self, expression: Expression, weight: f32) {
        self.expressions.insert(expression, weight.clamp(0.0, 1.0));
    }

    pub fn driven_joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.keys()
    }

    pub fn is_rest(&self) -> bool {
        self.joints.values().all(|q| q.angle() < 1e-6)
            && self.expressions.values().all(|w| *w == 0.0)
            && self.gaze_target == Vector3::zeros()
    }
}

/// Latest committed pose, published as a whole snapshot so readers never
/// observe a half-applied update.
#[derive(Clone, Debug, Default)]
pub struct SharedPose {
    current: Arc<RwLock<Arc<SkeletonPose>>>,
}

impl SharedPose {
    pub fn new(pose: SkeletonPose) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(pose))),
        }
    }

    pub fn snapshot(&self) -> Arc<SkeletonPose> {
        self.current.read().clone()
    }

    pub fn commit(&self, pose: SkeletonPose) {
        *self.current.write() = Arc::new(pose);
    }

    pub fn reset(&self) {
        self.commit(SkeletonPose::rest());
    }
}
