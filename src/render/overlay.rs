use super::draw::Canvas;
use crate::types::{HandRig, LandmarkFrame};

/// Keypoint pairs joined by a bone in the 21-point hand model.
pub const HAND_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

const LINE_COLOR: [u8; 4] = [56, 189, 248, 255];
const POINT_COLOR: [u8; 4] = [248, 113, 113, 255];
const LINE_THICKNESS: i32 = 4;
const POINT_RADIUS: i32 = 4;

/// Redraws the overlay for one result: transparent except for the hand
/// skeletons, mirrored to line up with the reference preview.
pub fn draw_landmarks(canvas: &mut Canvas<'_>, landmarks: &LandmarkFrame) {
    canvas.fill([0, 0, 0, 0]);
    for hand in [&landmarks.left_hand, &landmarks.right_hand]
        .into_iter()
        .flatten()
    {
        draw_hand(canvas, hand);
    }
}

fn draw_hand(canvas: &mut Canvas<'_>, hand: &HandRig) {
    let (width, height) = canvas.size();
    let points: Vec<(f32, f32)> = hand
        .keypoints
        .iter()
        .map(|p| ((1.0 - p.x) * width as f32, p.y * height as f32))
        .collect();
    if points.len() < 2 {
        return;
    }

    for &(a, b) in HAND_CONNECTIONS {
        if let (Some(&pa), Some(&pb)) = (points.get(a), points.get(b)) {
            canvas.line(pa, pb, LINE_COLOR, LINE_THICKNESS);
        }
    }
    for &point in &points {
        canvas.circle(point, POINT_RADIUS, POINT_COLOR);
    }
}
