//! `liveguide replay`: drive a liveness session from a recorded frame script.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use liveguide_core::{
    CaptureError, CompletedCapture, DetectedFace, FrameObservation, ImageHandle, LivenessStep,
    StepStatus,
};
use liveguide_runtime::{spawn_session, FrameSink, RuntimeConfig, Submit};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::manifest::{Manifest, MANIFEST_FILE};

/// One line of a frame script (JSON Lines).
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptFrame {
    /// Milliseconds since the start of the recording.
    pub t_ms: u64,
    pub width: u32,
    pub height: u32,
    /// Sensor rotation in degrees; 90 and 270 swap width and height.
    #[serde(default)]
    pub rotation: u32,
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

impl ScriptFrame {
    pub fn observation(&self) -> FrameObservation {
        FrameObservation::from_sensor(self.faces.clone(), self.width, self.height, self.rotation)
    }
}

/// Parse a frame script. Blank lines and `#` comments are skipped.
pub fn parse_script(text: &str) -> Result<Vec<ScriptFrame>> {
    let mut frames = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame: ScriptFrame = serde_json::from_str(line)
            .with_context(|| format!("invalid frame on line {}", idx + 1))?;
        if let Some(prev) = frames.last().map(|f: &ScriptFrame| f.t_ms) {
            if frame.t_ms < prev {
                bail!("line {}: timestamps must not go backwards", idx + 1);
            }
        }
        frames.push(frame);
    }
    Ok(frames)
}

/// Artifact written for each captured step: a snapshot of the frame that
/// triggered the capture.
#[derive(Serialize)]
struct CaptureRecord<'a> {
    session_id: &'a str,
    step: LivenessStep,
    captured_at: chrono::DateTime<Utc>,
    frame: &'a FrameObservation,
}

/// Writes one JSON capture record per step into the output directory and
/// prints guidance whenever the status changes.
pub struct FileSink {
    out_dir: PathBuf,
    session_id: Mutex<String>,
    last_status: Mutex<Option<StepStatus>>,
    quiet: bool,
}

impl FileSink {
    pub fn new(out_dir: PathBuf, quiet: bool) -> Self {
        Self {
            out_dir,
            session_id: Mutex::new(String::new()),
            last_status: Mutex::new(None),
            quiet,
        }
    }

    fn set_session_id(&self, id: String) {
        if let Ok(mut guard) = self.session_id.lock() {
            *guard = id;
        }
    }

    fn session_id(&self) -> String {
        self.session_id
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    fn artifact_path(&self, step: LivenessStep) -> PathBuf {
        self.out_dir.join(format!("{step}.json"))
    }
}

#[async_trait]
impl FrameSink for FileSink {
    fn on_status(&self, status: StepStatus) {
        let Ok(mut last) = self.last_status.lock() else {
            return;
        };
        if *last == Some(status) {
            return;
        }
        *last = Some(status);
        if self.quiet {
            return;
        }
        let g = status.guidance();
        if g.error.is_empty() {
            println!("[{}] {}", status.step, g.prompt);
        } else {
            println!("[{}] {} ({})", status.step, g.prompt, g.error);
        }
    }

    async fn capture(
        &self,
        step: LivenessStep,
        frame: &FrameObservation,
    ) -> Result<ImageHandle, CaptureError> {
        let session_id = self.session_id();
        let record = CaptureRecord {
            session_id: &session_id,
            step,
            captured_at: Utc::now(),
            frame,
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| CaptureError::Failed(e.to_string()))?;
        let path = self.artifact_path(step);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| CaptureError::Failed(format!("{}: {e}", path.display())))?;
        tracing::info!(step = %step, path = %path.display(), "capture written");
        Ok(ImageHandle::new(path.to_string_lossy()))
    }

    fn release(&self, handle: ImageHandle) {
        if let Err(e) = std::fs::remove_file(handle.as_str()) {
            tracing::debug!(handle = %handle, error = %e, "release: remove failed");
        }
    }

    fn on_complete(&self, capture: &CompletedCapture) {
        tracing::info!(
            front = %capture.front,
            smile = %capture.smile,
            side = %capture.side,
            "session complete"
        );
    }
}

pub struct ReplayOptions {
    pub script: PathBuf,
    pub out_dir: PathBuf,
    pub config: Option<PathBuf>,
    /// Pace frames by their timestamps and drop frames while the session is busy.
    pub realtime: bool,
    pub quiet: bool,
}

/// Replay a script and write the manifest. Returns the manifest path.
pub async fn run(opts: ReplayOptions) -> Result<PathBuf> {
    let config = RuntimeConfig::load(opts.config.as_deref()).context("loading configuration")?;
    let text = std::fs::read_to_string(&opts.script)
        .with_context(|| format!("reading {}", opts.script.display()))?;
    let frames = parse_script(&text)?;
    std::fs::create_dir_all(&opts.out_dir)
        .with_context(|| format!("creating {}", opts.out_dir.display()))?;

    replay_frames(config, &frames, &opts.out_dir, opts.realtime, opts.quiet).await
}

pub async fn replay_frames(
    config: RuntimeConfig,
    frames: &[ScriptFrame],
    out_dir: &Path,
    realtime: bool,
    quiet: bool,
) -> Result<PathBuf> {
    let sink = Arc::new(FileSink::new(out_dir.to_path_buf(), quiet));
    let handle = spawn_session(config, sink.clone());
    let session_id = handle.id().to_string();
    sink.set_session_id(session_id.clone());
    tracing::info!(session_id = %session_id, frames = frames.len(), "replay started");

    let base = Instant::now();
    let tokio_base = tokio::time::Instant::now();
    let mut dropped = 0usize;
    for frame in frames {
        let offset = Duration::from_millis(frame.t_ms);
        let submitted = if realtime {
            tokio::time::sleep_until(tokio_base + offset).await;
            handle.submit_at(frame.observation(), base + offset)
        } else {
            handle.submit_wait(frame.observation(), base + offset).await
        };
        match submitted {
            Submit::Accepted => {}
            Submit::Dropped => dropped += 1,
            Submit::Closed => break,
        }
    }
    if dropped > 0 {
        tracing::info!(dropped, "frames dropped while session was busy");
    }

    let capture = handle
        .finish()
        .await
        .context("liveness session did not complete")?;

    let manifest = Manifest::build(&session_id, &capture)?;
    let manifest_path = out_dir.join(MANIFEST_FILE);
    manifest.write(&manifest_path)?;
    Ok(manifest_path)
}
