//! liveguide-runtime: the frame pipeline boundary around `liveguide-core`.
//!
//! Owns the single evaluation context for a session: frames are gated so at
//! most one is evaluated at a time, captures are awaited without interleaving
//! evaluation, and cancellation or timeout releases every captured handle.

pub mod config;
pub mod runner;
pub mod sink;

pub use config::{ConfigLoadError, RuntimeConfig};
pub use runner::{spawn_session, RunError, SessionHandle, Submit};
pub use sink::FrameSink;
