use std::sync::Arc;
use std::time::Instant;

use liveguide_core::{
    CaptureResolution, CompletedCapture, FrameObservation, FrameOutcome, LivenessSession,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::sink::FrameSink;

/// Frames waiting behind the one being evaluated. Anything beyond this is
/// dropped at the boundary rather than interleaved. A frame that was queued
/// while a capture ran is discarded once the capture resolves.
const FRAME_QUEUE_DEPTH: usize = 1;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("liveness session cancelled")]
    Cancelled,
    #[error("liveness session timed out")]
    TimedOut,
    #[error("frame stream ended before the session completed")]
    StreamEnded,
    #[error("session task failed: {0}")]
    TaskFailed(String),
}

/// Outcome of offering a frame to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Accepted,
    /// The session is still busy with an earlier frame or capture.
    Dropped,
    /// The session has ended.
    Closed,
}

struct Frame {
    observation: FrameObservation,
    at: Instant,
}

/// Producer-side handle to a running session.
///
/// Dropping the handle cancels the session.
pub struct SessionHandle {
    id: Uuid,
    frames: mpsc::Sender<Frame>,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<Result<CompletedCapture, RunError>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Offer a frame observed now. Never blocks; returns `Dropped` while busy.
    pub fn submit(&self, observation: FrameObservation) -> Submit {
        self.submit_at(observation, Instant::now())
    }

    /// Offer a frame observed at `at`. Never blocks; returns `Dropped` while busy.
    pub fn submit_at(&self, observation: FrameObservation, at: Instant) -> Submit {
        match self.frames.try_send(Frame { observation, at }) {
            Ok(()) => Submit::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!(session_id = %self.id, "session busy, frame dropped");
                Submit::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Submit::Closed,
        }
    }

    /// Wait for the session to accept a frame observed at `at`.
    ///
    /// For recorded streams where every frame must be evaluated in order.
    pub async fn submit_wait(&self, observation: FrameObservation, at: Instant) -> Submit {
        match self.frames.send(Frame { observation, at }).await {
            Ok(()) => Submit::Accepted,
            Err(_) => Submit::Closed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session, releasing every captured handle.
    ///
    /// A capture already in progress is allowed to finish so that its handle
    /// can be released too. Returns the session result if it had already
    /// completed.
    pub async fn cancel(self) -> Result<CompletedCapture, RunError> {
        let SessionHandle {
            frames,
            cancel,
            task,
            ..
        } = self;
        let _ = cancel.send(());
        drop(frames);
        join(task).await
    }

    /// Close the frame stream and wait for the session to finish evaluating
    /// what was already submitted.
    pub async fn finish(self) -> Result<CompletedCapture, RunError> {
        let SessionHandle {
            frames,
            cancel,
            task,
            ..
        } = self;
        drop(frames);
        let result = join(task).await;
        drop(cancel);
        result
    }
}

async fn join(
    task: JoinHandle<Result<CompletedCapture, RunError>>,
) -> Result<CompletedCapture, RunError> {
    task.await
        .map_err(|e| RunError::TaskFailed(e.to_string()))?
}

/// Spawn a session task on the current tokio runtime.
///
/// The task owns the `LivenessSession`; evaluation and capture run strictly one
/// after the other, so the session is never observed mid-update.
pub fn spawn_session(config: RuntimeConfig, sink: Arc<dyn FrameSink>) -> SessionHandle {
    let id = Uuid::new_v4();
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let span = tracing::info_span!("liveness_session", session_id = %id);
    let task = tokio::spawn(run_session(config, sink, frames_rx, cancel_rx).instrument(span));

    SessionHandle {
        id,
        frames: frames_tx,
        cancel: cancel_tx,
        task,
    }
}

async fn run_session(
    config: RuntimeConfig,
    sink: Arc<dyn FrameSink>,
    mut frames: mpsc::Receiver<Frame>,
    mut cancel: oneshot::Receiver<()>,
) -> Result<CompletedCapture, RunError> {
    tracing::info!(
        timeout_secs = config.session_timeout_secs,
        "liveness session started"
    );
    let mut session = LivenessSession::new();

    let deadline = config
        .session_timeout()
        .map(|t| tokio::time::Instant::now() + t);
    let expired = async move {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut cancel => return Err(abandon(session, sink.as_ref(), RunError::Cancelled)),
            _ = &mut expired => return Err(abandon(session, sink.as_ref(), RunError::TimedOut)),
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return Err(abandon(session, sink.as_ref(), RunError::StreamEnded)),
            },
        };

        let decision = session.on_frame(&frame.observation, frame.at, &config.liveness);
        for handle in decision.released {
            sink.release(handle);
        }
        if let Some(status) = decision.status {
            sink.on_status(status);
        }
        let ticket = match decision.outcome {
            FrameOutcome::Capture(ticket) => ticket,
            FrameOutcome::Continue | FrameOutcome::Suppressed | FrameOutcome::Finished => continue,
        };

        let mut capture = sink.capture(ticket.step(), &frame.observation);
        let interrupted = tokio::select! {
            biased;
            _ = &mut cancel => Err(RunError::Cancelled),
            _ = &mut expired => Err(RunError::TimedOut),
            result = &mut capture => Ok(result),
        };
        let result = match interrupted {
            Ok(result) => result,
            Err(reason) => {
                // The capture may already have produced an artifact.
                if let Ok(handle) = capture.await {
                    sink.release(handle);
                }
                return Err(abandon(session, sink.as_ref(), reason));
            }
        };

        match session.complete_capture(ticket, result) {
            CaptureResolution::Advanced { from, to } => {
                tracing::debug!(from = %from, to = %to, "advanced");
            }
            CaptureResolution::Completed(done) => {
                sink.on_complete(&done);
                return Ok(done);
            }
            CaptureResolution::Retry => {}
            CaptureResolution::Reset(released) => {
                for handle in released {
                    sink.release(handle);
                }
            }
            CaptureResolution::Stale(handle) => {
                if let Some(handle) = handle {
                    sink.release(handle);
                }
            }
        }

        let discarded = discard_queued(&mut frames);
        if discarded > 0 {
            tracing::trace!(discarded, "discarded frames queued during capture");
        }
    }
}

/// Drop every frame that arrived while a capture was in flight.
fn discard_queued(frames: &mut mpsc::Receiver<Frame>) -> usize {
    let mut discarded = 0;
    while frames.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

fn abandon(session: LivenessSession, sink: &dyn FrameSink, reason: RunError) -> RunError {
    tracing::warn!(
        step = %session.current_step(),
        reason = %reason,
        "liveness session ended without completing"
    );
    for handle in session.cancel() {
        sink.release(handle);
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use liveguide_core::{
        BoundingBox, CaptureError, DetectedFace, FaceError, ImageHandle, LivenessStep, StepStatus,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingSink {
        statuses: Mutex<Vec<StepStatus>>,
        captures: Mutex<Vec<LivenessStep>>,
        released: Mutex<Vec<ImageHandle>>,
        completed: Mutex<u32>,
        fail_first: bool,
        gated: bool,
        capture_started: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        fn on_status(&self, status: StepStatus) {
            self.statuses.lock().unwrap().push(status);
        }

        async fn capture(
            &self,
            step: LivenessStep,
            _frame: &FrameObservation,
        ) -> Result<ImageHandle, CaptureError> {
            let attempt = {
                let mut captures = self.captures.lock().unwrap();
                captures.push(step);
                captures.len()
            };
            self.capture_started.notify_one();
            if self.gated {
                self.gate.notified().await;
            }
            if self.fail_first && attempt == 1 {
                return Err(CaptureError::Failed("sensor busy".into()));
            }
            Ok(ImageHandle::new(format!("{step}-{attempt}")))
        }

        fn release(&self, handle: ImageHandle) {
            self.released.lock().unwrap().push(handle);
        }

        fn on_complete(&self, _capture: &CompletedCapture) {
            *self.completed.lock().unwrap() += 1;
        }
    }

    fn fast_config() -> RuntimeConfig {
        let mut cfg = RuntimeConfig::default();
        cfg.liveness.front_sustain_ms = 0;
        cfg.liveness.smile_sustain_ms = 0;
        cfg.liveness.side_sustain_ms = 0;
        cfg
    }

    fn obs(yaw: f32, smile: Option<f32>) -> FrameObservation {
        FrameObservation::new(
            vec![DetectedFace {
                bounding_box: BoundingBox::new(100.0, 100.0, 300.0, 300.0),
                yaw_degrees: yaw,
                pitch_degrees: 0.0,
                smiling_probability: smile,
            }],
            500,
            500,
        )
    }

    async fn feed(handle: &SessionHandle, frame: FrameObservation, count: usize, t: &mut Instant) {
        for _ in 0..count {
            handle.submit_wait(frame.clone(), *t).await;
            *t += Duration::from_millis(33);
        }
    }

    #[tokio::test]
    async fn scripted_session_completes_once() {
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_session(RuntimeConfig::default(), sink.clone());
        let mut t = Instant::now();

        // ~1.3 s frontal, ~0.7 s smiling, ~0.4 s turned at 30 fps
        feed(&handle, obs(0.0, None), 40, &mut t).await;
        feed(&handle, obs(0.0, Some(0.9)), 20, &mut t).await;
        feed(&handle, obs(35.0, None), 12, &mut t).await;

        let done = handle.finish().await.unwrap();
        assert_eq!(done.front, ImageHandle::new("front-1"));
        assert_eq!(done.smile, ImageHandle::new("smile-2"));
        assert_eq!(done.side, ImageHandle::new("side-3"));
        assert_eq!(*sink.completed.lock().unwrap(), 1);
        assert_eq!(
            *sink.captures.lock().unwrap(),
            vec![LivenessStep::Front, LivenessStep::Smile, LivenessStep::Side]
        );
        assert!(sink.released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn frames_are_dropped_while_capture_in_flight() {
        let sink = Arc::new(RecordingSink {
            gated: true,
            ..Default::default()
        });
        let handle = spawn_session(fast_config(), sink.clone());
        let t = Instant::now();

        handle.submit_wait(obs(0.0, None), t).await;
        handle.submit_wait(obs(0.0, None), t).await;
        sink.capture_started.notified().await;

        assert_eq!(handle.submit_at(obs(0.0, None), t), Submit::Accepted);
        assert_eq!(handle.submit_at(obs(0.0, None), t), Submit::Dropped);
        assert_eq!(handle.submit_at(obs(0.0, None), t), Submit::Dropped);

        sink.gate.notify_one();
        let err = handle.cancel().await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(sink.captures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn frame_queued_during_capture_is_not_evaluated() {
        let sink = Arc::new(RecordingSink {
            gated: true,
            ..Default::default()
        });
        let mut cfg = RuntimeConfig::default();
        cfg.liveness.front_sustain_ms = 0;
        let handle = spawn_session(cfg, sink.clone());
        let t0 = Instant::now();

        handle.submit_wait(obs(0.0, None), t0).await;
        handle.submit_wait(obs(0.0, None), t0).await;
        sink.capture_started.notified().await;

        let smiling = obs(0.0, Some(0.9));
        let queued = handle.submit_at(smiling.clone(), t0 + Duration::from_millis(10));
        let newest = handle.submit_at(smiling.clone(), t0 + Duration::from_millis(400));
        assert_eq!((queued, newest), (Submit::Accepted, Submit::Dropped));

        sink.gate.notify_one();
        // Accepted only once the queued frame has been discarded.
        handle
            .submit_wait(smiling, t0 + Duration::from_millis(610))
            .await;

        let err = handle.finish().await.unwrap_err();
        assert!(matches!(err, RunError::StreamEnded));
        // A single post-capture frame only starts the smile timer.
        assert_eq!(*sink.captures.lock().unwrap(), vec![LivenessStep::Front]);
        assert_eq!(
            *sink.statuses.lock().unwrap(),
            vec![
                StepStatus::new(LivenessStep::Front, FaceError::None),
                StepStatus::new(LivenessStep::Front, FaceError::None),
                StepStatus::new(LivenessStep::Smile, FaceError::None),
            ]
        );
        assert_eq!(
            *sink.released.lock().unwrap(),
            vec![ImageHandle::new("front-1")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_during_capture_releases_its_handle() {
        let sink = Arc::new(RecordingSink {
            gated: true,
            ..Default::default()
        });
        let mut cfg = fast_config();
        cfg.session_timeout_secs = 5;
        let handle = spawn_session(cfg, sink.clone());
        let t = Instant::now();

        handle.submit_wait(obs(0.0, None), t).await;
        handle.submit_wait(obs(0.0, None), t).await;
        sink.capture_started.notified().await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        sink.gate.notify_one();

        let err = handle.finish().await.unwrap_err();
        assert!(matches!(err, RunError::TimedOut));
        assert_eq!(*sink.completed.lock().unwrap(), 0);
        assert_eq!(
            *sink.released.lock().unwrap(),
            vec![ImageHandle::new("front-1")]
        );
    }

    #[tokio::test]
    async fn capture_failure_retries_same_step() {
        let sink = Arc::new(RecordingSink {
            fail_first: true,
            ..Default::default()
        });
        let handle = spawn_session(fast_config(), sink.clone());
        let mut t = Instant::now();

        feed(&handle, obs(0.0, None), 4, &mut t).await;
        feed(&handle, obs(0.0, Some(0.9)), 2, &mut t).await;
        feed(&handle, obs(-35.0, None), 2, &mut t).await;

        let done = handle.finish().await.unwrap();
        assert_eq!(done.front, ImageHandle::new("front-2"));
        assert_eq!(
            *sink.captures.lock().unwrap(),
            vec![
                LivenessStep::Front,
                LivenessStep::Front,
                LivenessStep::Smile,
                LivenessStep::Side
            ]
        );
    }

    #[tokio::test]
    async fn cancel_releases_handles_without_completion() {
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_session(fast_config(), sink.clone());
        let mut t = Instant::now();

        feed(&handle, obs(0.0, None), 2, &mut t).await;
        feed(&handle, obs(0.0, Some(0.9)), 2, &mut t).await;
        // one more frame guarantees the smile capture has been resolved
        feed(&handle, obs(0.0, None), 1, &mut t).await;

        let err = handle.cancel().await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(*sink.completed.lock().unwrap(), 0);
        assert_eq!(
            *sink.released.lock().unwrap(),
            vec![ImageHandle::new("front-1"), ImageHandle::new("smile-2")]
        );
    }

    #[tokio::test]
    async fn ended_stream_reports_incomplete() {
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_session(RuntimeConfig::default(), sink.clone());
        let mut t = Instant::now();
        feed(&handle, FrameObservation::new(vec![], 500, 500), 3, &mut t).await;

        let err = handle.finish().await.unwrap_err();
        assert!(matches!(err, RunError::StreamEnded));
        assert_eq!(
            sink.statuses.lock().unwrap().last().copied(),
            Some(StepStatus::new(LivenessStep::Front, FaceError::NoFace))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_times_out() {
        let sink = Arc::new(RecordingSink::default());
        let cfg = RuntimeConfig {
            session_timeout_secs: 5,
            ..RuntimeConfig::default()
        };
        let handle = spawn_session(cfg, sink.clone());
        let mut t = Instant::now();
        feed(&handle, obs(40.0, None), 3, &mut t).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
        assert_eq!(handle.submit(obs(0.0, None)), Submit::Closed);
        let err = handle.finish().await.unwrap_err();
        assert!(matches!(err, RunError::TimedOut));
    }
}
