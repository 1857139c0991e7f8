//! Error types for the capture → perception → decision pipeline.
//!
//! Nothing here is fatal to the process. Perception degradation is not an
//! error at all: it travels as the `degraded` flag on frames and observations.

use std::time::Duration;

use thiserror::Error;

/// Failure of a frame capture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The window handle is stale; the caller must re-run window discovery.
    #[error("target window is gone")]
    WindowGone,

    #[error("capture strategy {strategy} timed out after {after:?}")]
    Timeout { strategy: &'static str, after: Duration },

    #[error("all {attempted} capture strategies failed")]
    AllStrategiesExhausted { attempted: usize },

    /// A single strategy failed. Absorbed by the selector, never returned from it.
    #[error("{strategy}: {message}")]
    Os { strategy: &'static str, message: String },
}

impl CaptureError {
    pub fn os(strategy: &'static str, message: impl Into<String>) -> Self {
        CaptureError::Os { strategy, message: message.into() }
    }
}

/// Failure to deliver an action to the target window. Retried next tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("target window is gone")]
    WindowGone,

    #[error("unsupported action: {0}")]
    Unsupported(String),

    #[error("input injection failed: {0}")]
    Os(String),
}

/// Problems with the settings document.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}
