//! liveguide-core: guided liveness evaluation.
//!
//! Walks a subject through an ordered sequence of facial poses (frontal,
//! smiling, turned to the side), validating each from a single frame's face
//! detection output. The crate is pure computation: it never touches a camera,
//! a detector, or the filesystem. Callers feed one [`FrameObservation`] per
//! frame into a [`LivenessSession`] and act on the returned decision.

pub mod config;
pub mod geometry;
pub mod guidance;
pub mod policy;
pub mod session;
pub mod types;

pub use config::{ConfigError, LivenessConfig};
pub use guidance::{guidance, Guidance};
pub use policy::StepVerdict;
pub use session::{
    CaptureError, CaptureResolution, CaptureTicket, CompletedCapture, FrameDecision, FrameOutcome,
    LivenessSession,
};
pub use types::{
    BoundingBox, DetectedFace, FaceError, FrameObservation, ImageHandle, LivenessStep, StepStatus,
};
