//! Frame acquisition.
//!
//! A [`CaptureStrategy`] is one OS call sequence that turns a window into a
//! [`Frame`]. Platforms provide an ordered list of them; the
//! [`CaptureStrategySelector`] tries them with rate limiting, per-strategy
//! statistics, a sticky last-good strategy and blank-frame detection.
//! Every attempt runs on an [`runner::AttemptRunner`] worker so it is bounded
//! by a timeout even if the OS call hangs.

pub mod frame;
pub mod runner;
pub mod selector;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::platform::WindowHandle;

pub use frame::Frame;
pub use selector::{CaptureOutcome, CaptureStrategySelector, StrategyReport, StrategyStats};

/// One way of grabbing pixels from a window.
///
/// Implementations are stateless and must release every OS resource they
/// acquire on all exit paths (platforms do this with drop guards).
pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn capture(&self, window: &dyn WindowHandle) -> Result<Frame, CaptureError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Minimum spacing between two capture calls.
    pub min_interval_ms: u64,
    /// Bound on a single strategy attempt.
    pub attempt_timeout_ms: u64,
    /// Frames with mean luma below this are treated as blanked.
    pub luminance_floor: f64,
    /// Optional explicit strategy order by name; unnamed strategies follow.
    pub strategies: Vec<String>,
    /// How often strategy statistics are logged.
    pub stats_interval_ms: u64,
}

impl CaptureSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 40,
            attempt_timeout_ms: 750,
            luminance_floor: 12.0,
            strategies: Vec::new(),
            stats_interval_ms: 30_000,
        }
    }
}
