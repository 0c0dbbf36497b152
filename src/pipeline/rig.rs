use std::collections::HashMap;

use super::skeleton::{FingerBone, Joint, finger_joints};
use crate::types::{Finger, Side};

#[derive(Clone, Debug, PartialEq)]
pub struct RigNode {
    pub parent: Option<Joint>,
    pub visible: bool,
}

/// Joint hierarchy of the loaded avatar.
///
/// Avatars are free to omit joints (many have no chest, some no fingers),
/// so every lookup is fallible.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rig {
    nodes: HashMap<Joint, RigNode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drivable {
    Yes,
    /// Not part of this avatar at all.
    Missing,
    /// Present, but its parent is absent or hidden.
    Detached,
}

impl Rig {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Full humanoid hierarchy with every joint visible.
    pub fn humanoid() -> Self {
        let mut rig = Rig::empty();
        rig.insert(Joint::Hips, None);
        rig.insert(Joint::Spine, Some(Joint::Hips));
        rig.insert(Joint::Chest, Some(Joint::Spine));
        rig.insert(Joint::Neck, Some(Joint::Chest));
        rig.insert(Joint::Head, Some(Joint::Neck));

        for side in [Side::Left, Side::Right] {
            rig.insert(Joint::UpperArm(side), Some(Joint::Chest));
            rig.insert(Joint::LowerArm(side), Some(Joint::UpperArm(side)));
            rig.insert(Joint::Hand(side), Some(Joint::LowerArm(side)));

            for joint in finger_joints(side) {
                rig.insert(joint, Some(finger_parent(joint)));
            }
        }

        rig
    }

    pub fn insert(&mut self, joint: Joint, parent: Option<Joint>) {
        self.nodes.insert(
            joint,
            RigNode {
                parent,
                visible: true,
            },
        );
    }

    pub fn without(mut self, joint: Joint) -> Self {
        self.nodes.remove(&joint);
        self
    }

    pub fn hidden(mut self, joint: Joint) -> Self {
        if let Some(node) = self.nodes.get_mut(&joint) {
            node.visible = false;
        }
        self
    }

    pub fn contains(&self, joint: Joint) -> bool {
        self.nodes.contains_key(&joint)
    }

    pub fn node(&self, joint: Joint) -> Option<&RigNode> {
        self.nodes.get(&joint)
    }

    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.nodes.keys()
    }

    pub fn drivable(&self, joint: Joint) -> Drivable {
        let Some(node) = self.nodes.get(&joint) else {
            return Drivable::Missing;
        };
        let Some(parent) = node.parent else {
            return Drivable::Detached;
        };
        match self.nodes.get(&parent) {
            Some(parent) if parent.visible => Drivable::Yes,
            _ => Drivable::Detached,
        }
    }
}

/// Parent of a finger segment in the humanoid chain. The thumb starts at
/// its metacarpal, the other fingers at the proximal segment.
fn finger_parent(joint: Joint) -> Joint {
    let Joint::Finger(side, finger, bone) = joint else {
        return joint;
    };
    let hand = Joint::Hand(side);
    match (finger, bone) {
        (Finger::Thumb, FingerBone::Metacarpal) => hand,
        (Finger::Thumb, FingerBone::Proximal) => {
            Joint::Finger(side, finger, FingerBone::Metacarpal)
        }
        (_, FingerBone::Proximal) | (_, FingerBone::Metacarpal) => hand,
        (Finger::Thumb, FingerBone::Distal) => Joint::Finger(side, finger, FingerBone::Proximal),
        (_, FingerBone::Intermediate) => Joint::Finger(side, finger, FingerBone::Proximal),
        (_, FingerBone::Distal) => Joint::Finger(side, finger, FingerBone::Intermediate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanoid_limbs_are_drivable() {
        let rig = Rig::humanoid();
        assert_eq!(rig.drivable(Joint::Neck), Drivable::Yes);
        assert_eq!(rig.drivable(Joint::LowerArm(Side::Right)), Drivable::Yes);
        assert_eq!(
            rig.drivable(Joint::Finger(Side::Left, Finger::Thumb, FingerBone::Distal)),
            Drivable::Yes
        );
    }

    #[test]
    fn root_joint_is_never_driven() {
        assert_eq!(Rig::humanoid().drivable(Joint::Hips), Drivable::Detached);
    }

    #[test]
    fn missing_or_hidden_parent_detaches_child() {
        let rig = Rig::humanoid().without(Joint::Chest);
        assert_eq!(rig.drivable(Joint::Chest), Drivable::Missing);
        assert_eq!(rig.drivable(Joint::Neck), Drivable::Detached);

        let rig = Rig::humanoid().hidden(Joint::Hand(Side::Left));
        assert_eq!(
            rig.drivable(Joint::Finger(Side::Left, Finger::Index, FingerBone::Proximal)),
            Drivable::Detached
        );
        assert_eq!(rig.drivable(Joint::Hand(Side::Left)), Drivable::Yes);
    }
}
