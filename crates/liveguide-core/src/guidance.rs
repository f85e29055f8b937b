//! Deterministic user-facing text for each `(step, error)` pair.

use serde::Serialize;

use crate::types::{FaceError, LivenessStep};

/// Prompt for the active step plus an optional correction. Empty strings mean
/// nothing to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Guidance {
    pub prompt: &'static str,
    pub error: &'static str,
}

pub fn guidance(step: LivenessStep, error: FaceError) -> Guidance {
    Guidance {
        prompt: prompt_text(step),
        error: error_text(error),
    }
}

fn prompt_text(step: LivenessStep) -> &'static str {
    match step {
        LivenessStep::Front => "Please make sure your face is in the center of the screen",
        LivenessStep::Smile => "Please smile",
        LivenessStep::Side => "Please slowly turn your head left or right",
        LivenessStep::Done => "",
    }
}

fn error_text(error: FaceError) -> &'static str {
    match error {
        FaceError::None => "",
        FaceError::NotCentered => "Please move your face to the center of the screen",
        FaceError::TooFar => "Please move closer",
        FaceError::TooClose => "Please move farther away",
        FaceError::MultipleFaces => {
            "Multiple faces detected, please ensure only one person is in view"
        }
        FaceError::NoFace => "No face detected, please face the camera",
    }
}
