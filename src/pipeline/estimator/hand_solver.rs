use std::f32::consts::FRAC_PI_2;

use nalgebra::Vector3;

use super::common::NUM_LANDMARKS;
use crate::types::{Finger, HandRig, Phalanx, Side};

const WRIST: usize = 0;
const INDEX_MCP: usize = 5;
const MIDDLE_MCP: usize = 9;

const FINGER_CURL_LIMIT: f32 = FRAC_PI_2;
const THUMB_CURL_LIMIT: f32 = FRAC_PI_2 * 0.66;

/// Landmark indices of the three joints and the tip of each finger.
fn finger_chain(finger: Finger) -> [usize; 4] {
    match finger {
        Finger::Thumb => [1, 2, 3, 4],
        Finger::Index => [5, 6, 7, 8],
        Finger::Middle => [9, 10, 11, 12],
        Finger::Ring => [13, 14, 15, 16],
        Finger::Little => [17, 18, 19, 20],
    }
}

/// Turns 21 hand keypoints (pixel x/y, relative depth z) into segment
/// rotations for the avatar hand on `rig_side`. Fingers curl about z; the
/// thumb folds across the palm about y.
pub fn solve_hand(points: &[Vector3<f32>], rig_side: Side) -> Option<HandRig> {
    if points.len() < NUM_LANDMARKS {
        return None;
    }

    let curl_sign = match rig_side {
        Side::Left => 1.0,
        Side::Right => -1.0,
    };

    let mut rig = HandRig::new(rig_side);
    rig.wrist = wrist_orientation(points);

    for finger in Finger::ALL {
        let chain = finger_chain(finger);
        let mut previous = points[WRIST];
        for (phalanx, window) in Phalanx::ALL.into_iter().zip(chain.windows(2)) {
            let joint = points[window[0]];
            let next = points[window[1]];
            let bend = bend_angle(joint - previous, next - joint);
            previous = joint;

            let angles = match finger {
                Finger::Thumb => Vector3::new(0.0, curl_sign * bend.min(THUMB_CURL_LIMIT), 0.0),
                _ => Vector3::new(0.0, 0.0, curl_sign * bend.min(FINGER_CURL_LIMIT)),
            };
            rig.segments.insert((finger, phalanx), angles);
        }
    }

    Some(rig)
}

/// Solves a hand the estimator labelled `detected`. The reference feed is
/// mirrored, so the rotations are those of the opposite avatar hand.
pub fn solve_detected_hand(points: &[Vector3<f32>], detected: Side) -> Option<HandRig> {
    solve_hand(points, detected.mirrored())
}

fn bend_angle(incoming: Vector3<f32>, outgoing: Vector3<f32>) -> f32 {
    let (a, b) = (incoming.norm(), outgoing.norm());
    if a < 1e-4 || b < 1e-4 {
        return 0.0;
    }
    (incoming.dot(&outgoing) / (a * b)).clamp(-1.0, 1.0).acos()
}

fn wrist_orientation(points: &[Vector3<f32>]) -> Option<Vector3<f32>> {
    let up = points[MIDDLE_MCP] - points[WRIST];
    let planar = (up.x * up.x + up.y * up.y).sqrt();
    if planar < 1e-4 || (points[INDEX_MCP] - points[WRIST]).norm() < 1e-4 {
        return None;
    }

    // Image y grows downward, so an upright hand points along -y.
    let lateral = up.x.atan2(-up.y).clamp(-FRAC_PI_2, FRAC_PI_2);
    let tilt = (-up.z).atan2(planar).clamp(-FRAC_PI_2, FRAC_PI_2);
    Some(Vector3::new(tilt, lateral, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Upright flat hand in image space, fingers straight up.
    fn flat_hand() -> Vec<Vector3<f32>> {
        let mut points = vec![Vector3::new(100.0, 200.0, 0.0)];
        for (i, x) in [70.0f32, 90.0, 100.0, 110.0, 125.0].iter().enumerate() {
            let base_y = if i == 0 { 180.0 } else { 150.0 };
            for k in 0..4 {
                points.push(Vector3::new(*x, base_y - 15.0 * k as f32, 0.0));
            }
        }
        points
    }

    #[test]
    fn straight_fingers_have_no_curl() {
        let rig = solve_hand(&flat_hand(), Side::Left).expect("rig");
        let distal = rig.segment(Finger::Index, Phalanx::Distal).expect("segment");
        assert!(distal.z.abs() < 1e-3);
        assert_eq!(rig.segments.len(), 15);
    }

    #[test]
    fn folded_finger_curls_with_side_sign() {
        let mut points = flat_hand();
        // Fold the index tip back toward the palm.
        points[8] = Vector3::new(90.0, 135.0, 0.0) + Vector3::new(0.0, 15.0, 0.0);

        let left = solve_hand(&points, Side::Left).expect("left");
        let right = solve_hand(&points, Side::Right).expect("right");

        let l = left.segment(Finger::Index, Phalanx::Distal).expect("segment").z;
        let r = right.segment(Finger::Index, Phalanx::Distal).expect("segment").z;
        assert!(l > 1.0);
        assert!((l + r).abs() < 1e-6);
    }

    #[test]
    fn detected_left_hand_curls_right_avatar_fingers_like_a_right_hand() {
        use crate::pipeline::{
            retarget::{Retargeter, rotation_from_axis_angles},
            rig::Rig,
            skeleton::{FingerBone, Joint, SkeletonPose},
        };
        use crate::types::LandmarkFrame;

        let mut points = flat_hand();
        points[8] = Vector3::new(90.0, 150.0, 0.0);

        let detected = solve_detected_hand(&points, Side::Left).expect("rig");
        assert_eq!(detected.side, Side::Right);
        let direct = solve_hand(&points, Side::Right).expect("rig");

        let frame = LandmarkFrame {
            left_hand: Some(detected),
            ..LandmarkFrame::empty()
        };
        let mut retargeter = Retargeter::new(Rig::humanoid());
        let pose = retargeter.retarget(&SkeletonPose::rest(), &frame, 0.1);

        let joint = Joint::Finger(Side::Right, Finger::Index, FingerBone::Distal);
        let expected = rotation_from_axis_angles(
            direct.segment(Finger::Index, Phalanx::Distal).expect("segment"),
        );
        let actual = pose.rotation(joint);
        assert!(actual.angle() > 1.0);
        assert!(actual.angle_to(&expected) < 1e-4);
    }

    #[test]
    fn upright_hand_has_neutral_wrist() {
        let rig = solve_hand(&flat_hand(), Side::Right).expect("rig");
        let wrist = rig.wrist.expect("wrist");
        assert!(wrist.x.abs() < 1e-3);
        assert!(wrist.y.abs() < 1e-3);
    }

    #[test]
    fn too_few_points_yield_nothing() {
        assert!(solve_hand(&flat_hand()[..10], Side::Left).is_none());
    }
}
