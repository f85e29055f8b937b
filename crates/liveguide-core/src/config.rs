use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::types::LivenessStep;

// Empirically tuned against a front camera held at arm's length. These values
// must be reproduced exactly for behavioural parity with deployed clients.

/// Face area / frame area above which the subject is too close.
pub const DEFAULT_TOO_CLOSE_RATIO: f32 = 0.36;
/// Face area / frame area below which the subject is too far.
pub const DEFAULT_TOO_FAR_RATIO: f32 = 0.12;
/// Maximum normalised offset of the face centre from the frame centre, per axis.
pub const DEFAULT_CENTER_TOLERANCE: f32 = 0.15;
/// Fraction trimmed from each side of the detector box (edge overshoot).
pub const DEFAULT_EDGE_INSET: f32 = 0.10;
/// Frontal pose: |yaw| must not exceed this (degrees).
pub const DEFAULT_FRONTAL_YAW_MAX: f32 = 12.0;
/// Side pose: |yaw| must exceed this (degrees).
pub const DEFAULT_SIDE_YAW_MIN: f32 = 20.0;
/// Frontal and side poses: |pitch| must not exceed this (degrees).
pub const DEFAULT_PITCH_MAX: f32 = 8.0;
/// Smiling probability above which the subject counts as smiling.
pub const DEFAULT_SMILE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_FRONT_SUSTAIN_MS: u64 = 1000;
pub const DEFAULT_SMILE_SUSTAIN_MS: u64 = 500;
pub const DEFAULT_SIDE_SUSTAIN_MS: u64 = 250;
/// Failed frames tolerated on a step before the whole session resets.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Consecutive faceless frames tolerated before the whole session resets.
pub const DEFAULT_MAX_EMPTY_FRAMES: u32 = 10;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be in (0, 1], got {value}")]
    RatioOutOfRange { name: &'static str, value: f32 },
    #[error("too_far_ratio ({too_far}) must be below too_close_ratio ({too_close})")]
    InvertedDistance { too_far: f32, too_close: f32 },
    #[error("edge_inset must be in [0, 0.5), got {0}")]
    InsetOutOfRange(f32),
    #[error("smile_threshold must be in [0, 1], got {0}")]
    SmileOutOfRange(f32),
    #[error("frontal_yaw_max ({frontal}) must be below side_yaw_min ({side})")]
    OverlappingPoses { frontal: f32, side: f32 },
    #[error("{name} must be a non-negative angle, got {value}")]
    NegativeAngle { name: &'static str, value: f32 },
}

/// Tunable thresholds for pose evaluation and session pacing.
///
/// Every field defaults to the reference value; a TOML file or environment
/// overrides any subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub too_close_ratio: f32,
    pub too_far_ratio: f32,
    pub center_tolerance: f32,
    pub edge_inset: f32,
    pub frontal_yaw_max: f32,
    pub side_yaw_min: f32,
    pub pitch_max: f32,
    pub smile_threshold: f32,
    pub front_sustain_ms: u64,
    pub smile_sustain_ms: u64,
    pub side_sustain_ms: u64,
    pub max_retries: u32,
    pub max_empty_frames: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            too_close_ratio: DEFAULT_TOO_CLOSE_RATIO,
            too_far_ratio: DEFAULT_TOO_FAR_RATIO,
            center_tolerance: DEFAULT_CENTER_TOLERANCE,
            edge_inset: DEFAULT_EDGE_INSET,
            frontal_yaw_max: DEFAULT_FRONTAL_YAW_MAX,
            side_yaw_min: DEFAULT_SIDE_YAW_MIN,
            pitch_max: DEFAULT_PITCH_MAX,
            smile_threshold: DEFAULT_SMILE_THRESHOLD,
            front_sustain_ms: DEFAULT_FRONT_SUSTAIN_MS,
            smile_sustain_ms: DEFAULT_SMILE_SUSTAIN_MS,
            side_sustain_ms: DEFAULT_SIDE_SUSTAIN_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_empty_frames: DEFAULT_MAX_EMPTY_FRAMES,
        }
    }
}

impl LivenessConfig {
    /// How long the step's predicate must hold, uninterrupted, before capture.
    pub fn sustain_for(&self, step: LivenessStep) -> Duration {
        let ms = match step {
            LivenessStep::Front => self.front_sustain_ms,
            LivenessStep::Smile => self.smile_sustain_ms,
            LivenessStep::Side => self.side_sustain_ms,
            LivenessStep::Done => 0,
        };
        Duration::from_millis(ms)
    }

    /// Reject threshold combinations that would make a step unreachable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("too_close_ratio", self.too_close_ratio),
            ("too_far_ratio", self.too_far_ratio),
            ("center_tolerance", self.center_tolerance),
        ] {
            if value.is_nan() || value <= 0.0 || value > 1.0 {
                return Err(ConfigError::RatioOutOfRange { name, value });
            }
        }
        if self.too_far_ratio >= self.too_close_ratio {
            return Err(ConfigError::InvertedDistance {
                too_far: self.too_far_ratio,
                too_close: self.too_close_ratio,
            });
        }
        if !(0.0..0.5).contains(&self.edge_inset) {
            return Err(ConfigError::InsetOutOfRange(self.edge_inset));
        }
        if !(0.0..=1.0).contains(&self.smile_threshold) {
            return Err(ConfigError::SmileOutOfRange(self.smile_threshold));
        }
        for (name, value) in [
            ("frontal_yaw_max", self.frontal_yaw_max),
            ("side_yaw_min", self.side_yaw_min),
            ("pitch_max", self.pitch_max),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(ConfigError::NegativeAngle { name, value });
            }
        }
        if self.frontal_yaw_max >= self.side_yaw_min {
            return Err(ConfigError::OverlappingPoses {
                frontal: self.frontal_yaw_max,
                side: self.side_yaw_min,
            });
        }
        Ok(())
    }
}
