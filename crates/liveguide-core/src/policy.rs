//! Per-step acceptance predicates, independent of timing.
//!
//! | step  | distance | centering | predicate        |
//! |-------|----------|-----------|------------------|
//! | Front | yes      | yes       | frontal pose     |
//! | Smile | yes      | yes       | smiling          |
//! | Side  | no       | no        | side pose        |
//!
//! The Side step skips spatial gating because the subject is expected to move
//! off-centre while turning.

use crate::config::LivenessConfig;
use crate::geometry::{self, FaceDistance};
use crate::types::{DetectedFace, FaceError, LivenessStep};

/// Outcome of evaluating one face against the active step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepVerdict {
    /// A pre-check failed; counts against the retry budget.
    Reject(FaceError),
    /// Pre-checks passed but the pose or expression is not there yet.
    Hold,
    /// The step's condition holds on this frame.
    Pass,
}

/// Evaluate `face` for `step`. `Done` always holds: it has no predicate.
pub fn evaluate(
    step: LivenessStep,
    face: &DetectedFace,
    frame_w: u32,
    frame_h: u32,
    cfg: &LivenessConfig,
) -> StepVerdict {
    let satisfied = match step {
        LivenessStep::Front => {
            if let Some(err) = spatial_gate(face, frame_w, frame_h, cfg) {
                return StepVerdict::Reject(err);
            }
            geometry::is_frontal_pose(face.yaw_degrees, face.pitch_degrees, cfg)
        }
        LivenessStep::Smile => {
            if let Some(err) = spatial_gate(face, frame_w, frame_h, cfg) {
                return StepVerdict::Reject(err);
            }
            geometry::is_smiling(face.smile(), cfg)
        }
        LivenessStep::Side => geometry::is_side_pose(face.yaw_degrees, face.pitch_degrees, cfg),
        LivenessStep::Done => return StepVerdict::Hold,
    };

    if satisfied {
        StepVerdict::Pass
    } else {
        StepVerdict::Hold
    }
}

/// Distance first, then centering, on the clamped and inset region.
fn spatial_gate(
    face: &DetectedFace,
    frame_w: u32,
    frame_h: u32,
    cfg: &LivenessConfig,
) -> Option<FaceError> {
    let region = geometry::normalize_region(&face.bounding_box, frame_w, frame_h, cfg);
    match geometry::face_distance(&region, frame_w, frame_h, cfg) {
        FaceDistance::TooClose => return Some(FaceError::TooClose),
        FaceDistance::TooFar => return Some(FaceError::TooFar),
        FaceDistance::Ok => {}
    }
    if !geometry::face_centered(&region, frame_w, frame_h, cfg) {
        return Some(FaceError::NotCentered);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn face(b: BoundingBox, yaw: f32, pitch: f32, smile: Option<f32>) -> DetectedFace {
        DetectedFace {
            bounding_box: b,
            yaw_degrees: yaw,
            pitch_degrees: pitch,
            smiling_probability: smile,
        }
    }

    // 300×300 centred in 500×500; after 10% inset 240×240 → ratio 0.2304
    fn good_box() -> BoundingBox {
        BoundingBox::new(100.0, 100.0, 300.0, 300.0)
    }

    #[test]
    fn front_passes_on_centred_frontal_face() {
        let f = face(good_box(), 2.0, -1.0, None);
        assert_eq!(
            evaluate(LivenessStep::Front, &f, 500, 500, &LivenessConfig::default()),
            StepVerdict::Pass
        );
    }

    #[test]
    fn front_holds_when_turned() {
        let f = face(good_box(), 30.0, 0.0, None);
        assert_eq!(
            evaluate(LivenessStep::Front, &f, 500, 500, &LivenessConfig::default()),
            StepVerdict::Hold
        );
    }

    #[test]
    fn distance_is_checked_before_centering() {
        // tiny and off-centre: distance wins
        let f = face(BoundingBox::new(0.0, 0.0, 50.0, 50.0), 0.0, 0.0, None);
        assert_eq!(
            evaluate(LivenessStep::Front, &f, 500, 500, &LivenessConfig::default()),
            StepVerdict::Reject(FaceError::TooFar)
        );
    }

    #[test]
    fn too_close_rejected() {
        let f = face(BoundingBox::new(0.0, 0.0, 500.0, 500.0), 0.0, 0.0, None);
        assert_eq!(
            evaluate(LivenessStep::Smile, &f, 500, 500, &LivenessConfig::default()),
            StepVerdict::Reject(FaceError::TooClose)
        );
    }

    #[test]
    fn off_centre_rejected_for_front_and_smile() {
        let f = face(BoundingBox::new(200.0, 0.0, 300.0, 300.0), 0.0, 0.0, Some(0.9));
        let cfg = LivenessConfig::default();
        for step in [LivenessStep::Front, LivenessStep::Smile] {
            assert_eq!(
                evaluate(step, &f, 500, 500, &cfg),
                StepVerdict::Reject(FaceError::NotCentered)
            );
        }
    }

    #[test]
    fn smile_requires_probability() {
        let cfg = LivenessConfig::default();
        let f = face(good_box(), 0.0, 0.0, None);
        assert_eq!(evaluate(LivenessStep::Smile, &f, 500, 500, &cfg), StepVerdict::Hold);
        let f = face(good_box(), 0.0, 0.0, Some(0.8));
        assert_eq!(evaluate(LivenessStep::Smile, &f, 500, 500, &cfg), StepVerdict::Pass);
    }

    #[test]
    fn side_ignores_spatial_gating() {
        let f = face(BoundingBox::new(0.0, 0.0, 40.0, 40.0), -35.0, 2.0, None);
        assert_eq!(
            evaluate(LivenessStep::Side, &f, 500, 500, &LivenessConfig::default()),
            StepVerdict::Pass
        );
    }

    #[test]
    fn done_never_passes() {
        let f = face(good_box(), 0.0, 0.0, Some(1.0));
        assert_eq!(
            evaluate(LivenessStep::Done, &f, 500, 500, &LivenessConfig::default()),
            StepVerdict::Hold
        );
    }
}
