use std::path::{Path, PathBuf};
use std::time::Duration;

use liveguide_core::{ConfigError, LivenessConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default hard cap on a single liveness attempt.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
}

/// Runtime configuration: thresholds plus session lifecycle settings.
///
/// Sources, later wins: built-in defaults, optional TOML file, `LIVEGUIDE_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Hard cap on one attempt in seconds; `0` disables the cap.
    pub session_timeout_secs: u64,
    pub liveness: LivenessConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            liveness: LivenessConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.liveness.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `LIVEGUIDE_*` overrides from `lookup`. Unparseable values are
    /// ignored and the existing setting kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let l = &mut self.liveness;
        self.session_timeout_secs = parsed(
            &lookup,
            "LIVEGUIDE_SESSION_TIMEOUT_SECS",
            self.session_timeout_secs,
        );
        l.max_retries = parsed(&lookup, "LIVEGUIDE_MAX_RETRIES", l.max_retries);
        l.max_empty_frames = parsed(&lookup, "LIVEGUIDE_MAX_EMPTY_FRAMES", l.max_empty_frames);
        l.front_sustain_ms = parsed(&lookup, "LIVEGUIDE_FRONT_SUSTAIN_MS", l.front_sustain_ms);
        l.smile_sustain_ms = parsed(&lookup, "LIVEGUIDE_SMILE_SUSTAIN_MS", l.smile_sustain_ms);
        l.side_sustain_ms = parsed(&lookup, "LIVEGUIDE_SIDE_SUSTAIN_MS", l.side_sustain_ms);
        l.smile_threshold = parsed(&lookup, "LIVEGUIDE_SMILE_THRESHOLD", l.smile_threshold);
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_secs > 0).then(|| Duration::from_secs(self.session_timeout_secs))
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable override");
                default
            }
        },
        None => default,
    }
}
