//! Guided liveness state machine.
//!
//! A [`LivenessSession`] is an explicit value advanced one frame at a time by
//! [`LivenessSession::on_frame`]. It owns no clock and performs no I/O: the
//! caller supplies the frame timestamp and carries out any capture the session
//! asks for, reporting back through [`LivenessSession::complete_capture`].
//!
//! Transitions:
//! - `Front → Smile → Side → Done`, one step per successful capture.
//! - Any step → `Front` when the retry budget or the empty-frame budget is
//!   exceeded (full reset, captured handles released).
//!
//! While a capture is in flight every frame is suppressed, so at most one
//! capture is ever requested per step.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

use crate::config::LivenessConfig;
use crate::policy::{self, StepVerdict};
use crate::types::{FaceError, FrameObservation, ImageHandle, LivenessStep, StepStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("capture cancelled")]
    Cancelled,
}

/// Capability to resolve one in-flight capture.
///
/// Issued by [`LivenessSession::on_frame`] and consumed by
/// [`LivenessSession::complete_capture`]. Not `Clone`: a ticket resolves at
/// most once. Tickets issued before a reset are rejected as stale.
#[derive(Debug)]
pub struct CaptureTicket {
    step: LivenessStep,
    generation: u64,
}

impl CaptureTicket {
    pub fn step(&self) -> LivenessStep {
        self.step
    }
}

/// What the adapter must do after a frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Nothing further; wait for the next frame.
    Continue,
    /// Capture an image for the ticket's step, then resolve the ticket.
    Capture(CaptureTicket),
    /// A capture is in flight; the frame was not evaluated.
    Suppressed,
    /// The session already completed; the frame was not evaluated.
    Finished,
}

/// Result of evaluating one frame.
#[derive(Debug)]
pub struct FrameDecision {
    /// Status to surface to the user, absent when the frame was not evaluated.
    pub status: Option<StepStatus>,
    pub outcome: FrameOutcome,
    /// Handles dropped by a session reset during this frame.
    pub released: Vec<ImageHandle>,
}

/// Result of resolving a capture ticket.
#[derive(Debug, PartialEq)]
pub enum CaptureResolution {
    /// The step was captured and the session moved on.
    Advanced {
        from: LivenessStep,
        to: LivenessStep,
    },
    /// The final step was captured; the session is complete.
    Completed(CompletedCapture),
    /// Capture failed; the session stays on the same step.
    Retry,
    /// The session could not be completed and started over from `Front`.
    /// Every handle it held is returned for release.
    Reset(Vec<ImageHandle>),
    /// The ticket belongs to an earlier generation. Any handle it carried is
    /// returned for release.
    Stale(Option<ImageHandle>),
}

/// One handle per capture step, produced exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedCapture {
    pub front: ImageHandle,
    pub smile: ImageHandle,
    pub side: ImageHandle,
}

impl CompletedCapture {
    fn from_captured(captured: &BTreeMap<LivenessStep, ImageHandle>) -> Option<Self> {
        Some(Self {
            front: captured.get(&LivenessStep::Front)?.clone(),
            smile: captured.get(&LivenessStep::Smile)?.clone(),
            side: captured.get(&LivenessStep::Side)?.clone(),
        })
    }

    pub fn get(&self, step: LivenessStep) -> Option<&ImageHandle> {
        match step {
            LivenessStep::Front => Some(&self.front),
            LivenessStep::Smile => Some(&self.smile),
            LivenessStep::Side => Some(&self.side),
            LivenessStep::Done => None,
        }
    }
}

/// Mutable state of one liveness attempt.
#[derive(Debug)]
pub struct LivenessSession {
    current_step: LivenessStep,
    retry_count: u32,
    consecutive_empty_frames: u32,
    success_since: Option<Instant>,
    captured: BTreeMap<LivenessStep, ImageHandle>,
    completed: bool,
    in_flight: Option<LivenessStep>,
    generation: u64,
}

impl Default for LivenessSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessSession {
    pub fn new() -> Self {
        Self {
            current_step: LivenessStep::Front,
            retry_count: 0,
            consecutive_empty_frames: 0,
            success_since: None,
            captured: BTreeMap::new(),
            completed: false,
            in_flight: None,
            generation: 0,
        }
    }

    pub fn current_step(&self) -> LivenessStep {
        self.current_step
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn consecutive_empty_frames(&self) -> u32 {
        self.consecutive_empty_frames
    }

    pub fn success_since(&self) -> Option<Instant> {
        self.success_since
    }

    pub fn captured(&self) -> &BTreeMap<LivenessStep, ImageHandle> {
        &self.captured
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn capture_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Evaluate one frame observed at `now`.
    pub fn on_frame(
        &mut self,
        obs: &FrameObservation,
        now: Instant,
        cfg: &LivenessConfig,
    ) -> FrameDecision {
        if self.completed || self.current_step.is_terminal() {
            return FrameDecision::skipped(FrameOutcome::Finished);
        }
        if self.in_flight.is_some() {
            return FrameDecision::skipped(FrameOutcome::Suppressed);
        }

        let mut released = Vec::new();

        let face = match obs.faces.as_slice() {
            [] => {
                self.consecutive_empty_frames += 1;
                if self.consecutive_empty_frames > cfg.max_empty_frames {
                    tracing::info!(
                        step = %self.current_step,
                        empty_frames = self.consecutive_empty_frames,
                        "no face for too long, resetting session"
                    );
                    released = self.reset();
                }
                self.success_since = None;
                return FrameDecision {
                    status: Some(StepStatus::new(self.current_step, FaceError::NoFace)),
                    outcome: FrameOutcome::Continue,
                    released,
                };
            }
            [face] => {
                self.consecutive_empty_frames = 0;
                face
            }
            _ => {
                self.consecutive_empty_frames = 0;
                let status = StepStatus::new(self.current_step, FaceError::MultipleFaces);
                released = self.record_failure(FaceError::MultipleFaces, cfg);
                return FrameDecision {
                    status: Some(status),
                    outcome: FrameOutcome::Continue,
                    released,
                };
            }
        };

        let step = self.current_step;
        match policy::evaluate(step, face, obs.frame_width, obs.frame_height, cfg) {
            StepVerdict::Reject(error) => {
                released = self.record_failure(error, cfg);
                FrameDecision {
                    status: Some(StepStatus::new(step, error)),
                    outcome: FrameOutcome::Continue,
                    released,
                }
            }
            StepVerdict::Hold => {
                self.success_since = None;
                FrameDecision::evaluated(step, FrameOutcome::Continue)
            }
            StepVerdict::Pass => {
                let Some(since) = self.success_since else {
                    self.success_since = Some(now);
                    return FrameDecision::evaluated(step, FrameOutcome::Continue);
                };
                let elapsed = now.saturating_duration_since(since);
                if elapsed < cfg.sustain_for(step) {
                    return FrameDecision::evaluated(step, FrameOutcome::Continue);
                }

                tracing::debug!(
                    step = %step,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "step sustained, requesting capture"
                );
                self.success_since = None;
                self.in_flight = Some(step);
                FrameDecision::evaluated(
                    step,
                    FrameOutcome::Capture(CaptureTicket {
                        step,
                        generation: self.generation,
                    }),
                )
            }
        }
    }

    /// Resolve a capture previously requested through `ticket`.
    pub fn complete_capture(
        &mut self,
        ticket: CaptureTicket,
        result: Result<ImageHandle, CaptureError>,
    ) -> CaptureResolution {
        if ticket.generation != self.generation || self.in_flight != Some(ticket.step) {
            tracing::debug!(step = %ticket.step, "ignoring stale capture ticket");
            return CaptureResolution::Stale(result.ok());
        }
        self.in_flight = None;

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(step = %ticket.step, error = %e, "capture failed, staying on step");
                self.success_since = None;
                return CaptureResolution::Retry;
            }
        };

        let from = ticket.step;
        let to = from.next();
        self.captured.insert(from, handle);
        self.current_step = to;
        self.retry_count = 0;
        self.success_since = None;
        tracing::info!(from = %from, to = %to, "step captured");

        if to.is_terminal() {
            if let Some(done) = CompletedCapture::from_captured(&self.captured) {
                self.completed = true;
                tracing::info!("liveness session complete");
                return CaptureResolution::Completed(done);
            }
            tracing::error!(
                captured = self.captured.len(),
                "reached final step without every capture, resetting session"
            );
            return CaptureResolution::Reset(self.reset());
        }

        CaptureResolution::Advanced { from, to }
    }

    /// Return to `Front` with cleared counters. Returns the released handles.
    pub fn reset(&mut self) -> Vec<ImageHandle> {
        let released = std::mem::take(&mut self.captured).into_values().collect();
        *self = Self {
            generation: self.generation + 1,
            ..Self::new()
        };
        released
    }

    /// Abandon the session. Every captured handle is handed back for release
    /// and no completion is reported.
    pub fn cancel(self) -> Vec<ImageHandle> {
        tracing::debug!(
            step = %self.current_step,
            captured = self.captured.len(),
            "liveness session cancelled"
        );
        self.captured.into_values().collect()
    }

    fn record_failure(&mut self, error: FaceError, cfg: &LivenessConfig) -> Vec<ImageHandle> {
        self.success_since = None;
        self.retry_count += 1;
        if self.retry_count > cfg.max_retries {
            tracing::info!(
                step = %self.current_step,
                error = %error,
                retry_count = self.retry_count,
                "retry budget exhausted, resetting session"
            );
            return self.reset();
        }
        tracing::debug!(
            step = %self.current_step,
            error = %error,
            retry_count = self.retry_count,
            "frame rejected"
        );
        Vec::new()
    }
}

impl FrameDecision {
    fn skipped(outcome: FrameOutcome) -> Self {
        Self {
            status: None,
            outcome,
            released: Vec::new(),
        }
    }

    fn evaluated(step: LivenessStep, outcome: FrameOutcome) -> Self {
        Self {
            status: Some(StepStatus::new(step, FaceError::None)),
            outcome,
            released: Vec::new(),
        }
    }
}
