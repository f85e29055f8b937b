//! Capture manifest: one entry per captured step with its SHA-256 digest.

use chrono::{DateTime, Utc};
use liveguide_core::{CompletedCapture, LivenessStep};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("capture artifact not found: {step} ({path})")]
    MissingArtifact { step: LivenessStep, path: PathBuf },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode manifest {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed manifest {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "checksum mismatch for {step} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        step: LivenessStep,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub step: LivenessStep,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub session_id: String,
    pub completed_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Hash every artifact of a completed session. Handles are file paths.
    pub fn build(session_id: &str, capture: &CompletedCapture) -> Result<Self, ManifestError> {
        let mut entries = Vec::with_capacity(LivenessStep::CAPTURE_STEPS.len());
        for step in LivenessStep::CAPTURE_STEPS {
            let Some(handle) = capture.get(step) else {
                continue;
            };
            let path = PathBuf::from(handle.as_str());
            if !path.exists() {
                return Err(ManifestError::MissingArtifact { step, path });
            }
            let sha256 = sha256_file_hex(&path)?;
            entries.push(ManifestEntry { step, path, sha256 });
        }
        Ok(Self {
            session_id: session_id.to_string(),
            completed_at: Utc::now(),
            entries,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManifestError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Recompute each artifact digest and compare against the recorded one.
    pub fn verify(&self) -> Result<(), ManifestError> {
        for entry in &self.entries {
            if !entry.path.exists() {
                return Err(ManifestError::MissingArtifact {
                    step: entry.step,
                    path: entry.path.clone(),
                });
            }
            let digest = sha256_file_hex(&entry.path)?;
            if digest != entry.sha256 {
                return Err(ManifestError::ChecksumMismatch {
                    step: entry.step,
                    path: entry.path.clone(),
                    expected: entry.sha256.clone(),
                    got: digest,
                });
            }
        }
        Ok(())
    }
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ManifestError> {
    let mut file = fs::File::open(path).map_err(|source| ManifestError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file.read(&mut buf).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
