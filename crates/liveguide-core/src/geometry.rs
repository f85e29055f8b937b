//! Stateless geometry and pose predicates.
//!
//! All functions operate on a single face from a single frame. Thresholds come
//! from [`LivenessConfig`]; nothing here is tuned inline.

use serde::{Deserialize, Serialize};

use crate::config::LivenessConfig;
use crate::types::BoundingBox;

/// Subject distance from the camera, judged by relative face area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceDistance {
    TooClose,
    Ok,
    TooFar,
}

/// Clamp a detector box into the frame and trim the edge overshoot.
///
/// Must run before any ratio computation so that boxes hanging off the frame
/// never contribute negative or out-of-frame area.
pub fn normalize_region(
    region: &BoundingBox,
    frame_w: u32,
    frame_h: u32,
    cfg: &LivenessConfig,
) -> BoundingBox {
    region
        .clamp_to(frame_w as f32, frame_h as f32)
        .inset(cfg.edge_inset)
}

/// Classify distance from `face area / frame area`.
///
/// Both bounds are exclusive: a ratio exactly on a threshold is `Ok`.
pub fn face_distance(
    region: &BoundingBox,
    frame_w: u32,
    frame_h: u32,
    cfg: &LivenessConfig,
) -> FaceDistance {
    let frame_area = frame_w as f32 * frame_h as f32;
    if frame_area <= 0.0 {
        return FaceDistance::TooFar;
    }
    let ratio = region.area() / frame_area;
    if ratio > cfg.too_close_ratio {
        FaceDistance::TooClose
    } else if ratio < cfg.too_far_ratio {
        FaceDistance::TooFar
    } else {
        FaceDistance::Ok
    }
}

/// Whether the face centre lies within the tolerance box around the frame centre.
pub fn face_centered(
    region: &BoundingBox,
    frame_w: u32,
    frame_h: u32,
    cfg: &LivenessConfig,
) -> bool {
    if frame_w == 0 || frame_h == 0 {
        return false;
    }
    let (w, h) = (frame_w as f32, frame_h as f32);
    let (cx, cy) = region.center();
    let dx = (cx - w / 2.0) / w;
    let dy = (cy - h / 2.0) / h;
    dx.abs() <= cfg.center_tolerance && dy.abs() <= cfg.center_tolerance
}

/// Head facing the camera: small yaw, small pitch (inclusive bounds).
pub fn is_frontal_pose(yaw: f32, pitch: f32, cfg: &LivenessConfig) -> bool {
    yaw.abs() <= cfg.frontal_yaw_max && pitch.abs() <= cfg.pitch_max
}

/// Head turned left or right while keeping pitch level, so nodding does not
/// count as a turn.
pub fn is_side_pose(yaw: f32, pitch: f32, cfg: &LivenessConfig) -> bool {
    (yaw < -cfg.side_yaw_min || yaw > cfg.side_yaw_min) && pitch.abs() <= cfg.pitch_max
}

pub fn is_smiling(probability: f32, cfg: &LivenessConfig) -> bool {
    probability > cfg.smile_threshold
}
