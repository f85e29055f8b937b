use async_trait::async_trait;
use liveguide_core::{
    CaptureError, CompletedCapture, FrameObservation, ImageHandle, LivenessStep, StepStatus,
};

/// Adapter side of a liveness session.
///
/// Implemented by whatever owns the camera: it renders status updates,
/// performs the actual image capture, and frees handles the session no longer
/// needs. Calls arrive from the single session task, never concurrently.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Called for every evaluated frame.
    fn on_status(&self, status: StepStatus);

    /// Capture an image for `step`, triggered by `frame`. May perform I/O; no
    /// frame is evaluated until it returns, and frames that arrive meanwhile
    /// are discarded.
    async fn capture(
        &self,
        step: LivenessStep,
        frame: &FrameObservation,
    ) -> Result<ImageHandle, CaptureError>;

    /// A captured handle was discarded by a reset, cancellation or timeout.
    fn release(&self, _handle: ImageHandle) {}

    /// Called exactly once, when the final step is captured.
    fn on_complete(&self, _capture: &CompletedCapture) {}
}
