use std::{collections::HashMap, fmt, time::Instant};

use nalgebra::{Vector2, Vector3};

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut rgba = vec![0u8; width as usize * height as usize * 4];
        for px in rgba.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) as usize) * 4;
        self.rgba
            .get(idx..idx + 4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::VideoInput => "videoinput",
            DeviceKind::AudioInput => "audioinput",
            DeviceKind::AudioOutput => "audiooutput",
        }
    }
}

/// Entry returned by device enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
    pub group: String,
}

impl DeviceDescriptor {
    pub fn video_input(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::VideoInput,
            label: label.into(),
            group: String::new(),
        }
    }

    pub fn is_video_input(&self) -> bool {
        self.kind == DeviceKind::VideoInput
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn mirrored(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Axis angles in radians, applied in X, Y, Z order.
pub type AxisAngles = Vector3<f32>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Vowel {
    A,
    I,
    E,
    O,
    U,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MouthShape {
    pub a: Option<f32>,
    pub i: Option<f32>,
    pub e: Option<f32>,
    pub o: Option<f32>,
    pub u: Option<f32>,
}

impl MouthShape {
    pub fn vowel(&self, vowel: Vowel) -> Option<f32> {
        match vowel {
            Vowel::A => self.a,
            Vowel::I => self.i,
            Vowel::E => self.e,
            Vowel::O => self.o,
            Vowel::U => self.u,
        }
    }
}

/// Eye openness per side, 1.0 is fully open.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EyeOpenness {
    pub l: Option<f32>,
    pub r: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceRig {
    pub head: Option<AxisAngles>,
    pub mouth: Option<MouthShape>,
    pub eye: Option<EyeOpenness>,
    pub pupil: Option<Vector2<f32>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseRig {
    pub spine: Option<AxisAngles>,
    pub left_upper_arm: Option<AxisAngles>,
    pub left_lower_arm: Option<AxisAngles>,
    pub right_upper_arm: Option<AxisAngles>,
    pub right_lower_arm: Option<AxisAngles>,
    pub left_hand: Option<AxisAngles>,
    pub right_hand: Option<AxisAngles>,
}

impl PoseRig {
    pub fn upper_arm(&self, side: Side) -> Option<&AxisAngles> {
        match side {
            Side::Left => self.left_upper_arm.as_ref(),
            Side::Right => self.right_upper_arm.as_ref(),
        }
    }

    pub fn lower_arm(&self, side: Side) -> Option<&AxisAngles> {
        match side {
            Side::Left => self.left_lower_arm.as_ref(),
            Side::Right => self.right_lower_arm.as_ref(),
        }
    }

    pub fn hand(&self, side: Side) -> Option<&AxisAngles> {
        match side {
            Side::Left => self.left_hand.as_ref(),
            Side::Right => self.right_hand.as_ref(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Little,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Little,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Finger::Thumb => "Thumb",
            Finger::Index => "Index",
            Finger::Middle => "Middle",
            Finger::Ring => "Ring",
            Finger::Little => "Little",
        }
    }
}

/// Segment naming used by hand landmark results. The thumb reports
/// proximal/intermediate/distal like the other fingers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phalanx {
    Proximal,
    Intermediate,
    Distal,
}

impl Phalanx {
    pub const ALL: [Phalanx; 3] = [Phalanx::Proximal, Phalanx::Intermediate, Phalanx::Distal];
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandRig {
    /// Avatar side the rotations were solved for.
    pub side: Side,
    pub wrist: Option<AxisAngles>,
    pub segments: HashMap<(Finger, Phalanx), AxisAngles>,
    /// Detected keypoints in unmirrored image space, normalised to 0..1.
    pub keypoints: Vec<Vector2<f32>>,
}

impl HandRig {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            wrist: None,
            segments: HashMap::new(),
            keypoints: Vec::new(),
        }
    }

    pub fn segment(&self, finger: Finger, phalanx: Phalanx) -> Option<&AxisAngles> {
        self.segments.get(&(finger, phalanx))
    }
}

/// One estimator result. Every part is optional; absent parts leave the
/// corresponding joints untouched.
#[derive(Clone, Debug)]
pub struct LandmarkFrame {
    pub timestamp: Instant,
    pub face: Option<FaceRig>,
    pub pose: Option<PoseRig>,
    pub left_hand: Option<HandRig>,
    pub right_hand: Option<HandRig>,
}

impl LandmarkFrame {
    pub fn empty() -> Self {
        Self {
            timestamp: Instant::now(),
            face: None,
            pose: None,
            left_hand: None,
            right_hand: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.face.is_none()
            && self.pose.is_none()
            && self.left_hand.is_none()
            && self.right_hand.is_none()
    }
}

impl fmt::Display for LandmarkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |present: bool| if present { "+" } else { "-" };
        write!(
            f,
            "face{} pose{} left{} right{}",
            mark(self.face.is_some()),
            mark(self.pose.is_some()),
            mark(self.left_hand.is_some()),
            mark(self.right_hand.is_some())
        )
    }
}
