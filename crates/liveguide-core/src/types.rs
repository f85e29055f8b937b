use serde::{Deserialize, Serialize};
use std::fmt;

/// One ordered stage of the liveness challenge.
///
/// Steps are visited strictly in declaration order. `Done` is terminal and is
/// never captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessStep {
    Front,
    Smile,
    Side,
    Done,
}

impl LivenessStep {
    /// Steps that produce a captured image, in order.
    pub const CAPTURE_STEPS: [LivenessStep; 3] =
        [LivenessStep::Front, LivenessStep::Smile, LivenessStep::Side];

    /// The step following this one. `Done` maps to itself.
    pub fn next(self) -> Self {
        match self {
            LivenessStep::Front => LivenessStep::Smile,
            LivenessStep::Smile => LivenessStep::Side,
            LivenessStep::Side | LivenessStep::Done => LivenessStep::Done,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == LivenessStep::Done
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LivenessStep::Front => "front",
            LivenessStep::Smile => "smile",
            LivenessStep::Side => "side",
            LivenessStep::Done => "done",
        }
    }
}

impl fmt::Display for LivenessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-check outcome carried with every status update.
///
/// `None` means the frame passed all pre-checks for the active step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceError {
    None,
    NotCentered,
    TooFar,
    TooClose,
    MultipleFaces,
    NoFace,
}

impl FaceError {
    pub fn as_str(self) -> &'static str {
        match self {
            FaceError::None => "none",
            FaceError::NotCentered => "not_centered",
            FaceError::TooFar => "too_far",
            FaceError::TooClose => "too_close",
            FaceError::MultipleFaces => "multiple_faces",
            FaceError::NoFace => "no_face",
        }
    }
}

impl fmt::Display for FaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Clamp both corners into `[0, frame_w] × [0, frame_h]`.
    ///
    /// The result never has a negative width or height, even for boxes that lie
    /// entirely outside the frame.
    pub fn clamp_to(&self, frame_w: f32, frame_h: f32) -> Self {
        let left = self.x.clamp(0.0, frame_w);
        let top = self.y.clamp(0.0, frame_h);
        let right = (self.x + self.width).clamp(0.0, frame_w);
        let bottom = (self.y + self.height).clamp(0.0, frame_h);
        Self {
            x: left,
            y: top,
            width: (right - left).max(0.0),
            height: (bottom - top).max(0.0),
        }
    }

    /// Shrink every side by `fraction` of the corresponding dimension.
    pub fn inset(&self, fraction: f32) -> Self {
        let dx = self.width * fraction;
        let dy = self.height * fraction;
        Self {
            x: self.x + dx,
            y: self.y + dy,
            width: (self.width - 2.0 * dx).max(0.0),
            height: (self.height - 2.0 * dy).max(0.0),
        }
    }
}

/// A single face reported by the detector for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub yaw_degrees: f32,
    pub pitch_degrees: f32,
    #[serde(default)]
    pub smiling_probability: Option<f32>,
}

impl DetectedFace {
    /// Smiling probability, treating an absent classification as 0.
    pub fn smile(&self) -> f32 {
        self.smiling_probability.unwrap_or(0.0)
    }
}

/// Per-frame detector output, with portrait-relative frame dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl FrameObservation {
    pub fn new(faces: Vec<DetectedFace>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            faces,
            frame_width,
            frame_height,
        }
    }

    /// Build an observation from raw sensor dimensions.
    ///
    /// Sensors mounted at 90° or 270° report landscape dimensions for a portrait
    /// image; width and height are swapped so downstream ratios are computed in
    /// the orientation the detector saw.
    pub fn from_sensor(
        faces: Vec<DetectedFace>,
        sensor_width: u32,
        sensor_height: u32,
        rotation_degrees: u32,
    ) -> Self {
        let (frame_width, frame_height) = match rotation_degrees % 360 {
            90 | 270 => (sensor_height, sensor_width),
            _ => (sensor_width, sensor_height),
        };
        Self::new(faces, frame_width, frame_height)
    }
}

/// Opaque reference to a captured image, owned by the frame adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(pub String);

impl ImageHandle {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status update emitted for a processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step: LivenessStep,
    pub error: FaceError,
}

impl StepStatus {
    pub fn new(step: LivenessStep, error: FaceError) -> Self {
        Self { step, error }
    }

    pub fn guidance(&self) -> crate::Guidance {
        crate::guidance(self.step, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_order_is_fixed() {
        assert_eq!(LivenessStep::Front.next(), LivenessStep::Smile);
        assert_eq!(LivenessStep::Smile.next(), LivenessStep::Side);
        assert_eq!(LivenessStep::Side.next(), LivenessStep::Done);
        assert_eq!(LivenessStep::Done.next(), LivenessStep::Done);
        assert!(LivenessStep::Front < LivenessStep::Done);
    }

    #[test]
    fn clamp_keeps_box_inside_frame() {
        let b = BoundingBox::new(-20.0, 450.0, 100.0, 100.0).clamp_to(500.0, 500.0);
        assert_eq!(b, BoundingBox::new(0.0, 450.0, 80.0, 50.0));
    }

    #[test]
    fn clamp_never_produces_negative_area() {
        let b = BoundingBox::new(600.0, -300.0, 50.0, 100.0).clamp_to(500.0, 500.0);
        assert_eq!(b.width, 0.0);
        assert_eq!(b.height, 0.0);
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn inset_shrinks_symmetrically() {
        let b = BoundingBox::new(100.0, 100.0, 100.0, 200.0).inset(0.1);
        assert_eq!(b, BoundingBox::new(110.0, 120.0, 80.0, 160.0));
        assert_eq!(b.center(), (150.0, 200.0));
    }

    #[test]
    fn sensor_rotation_swaps_dimensions() {
        let obs = FrameObservation::from_sensor(vec![], 640, 480, 90);
        assert_eq!((obs.frame_width, obs.frame_height), (480, 640));
        let obs = FrameObservation::from_sensor(vec![], 640, 480, 180);
        assert_eq!((obs.frame_width, obs.frame_height), (640, 480));
    }

    #[test]
    fn missing_smile_probability_reads_as_zero() {
        let json = r#"{
            "bounding_box": { "x": 0, "y": 0, "width": 10, "height": 10 },
            "yaw_degrees": 0, "pitch_degrees": 0
        }"#;
        let face: DetectedFace = serde_json::from_str(json).unwrap();
        assert_eq!(face.smiling_probability, None);
        assert_eq!(face.smile(), 0.0);
    }
}
