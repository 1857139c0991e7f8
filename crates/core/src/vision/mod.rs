//! Frame → Observation.

pub mod blobs;
pub mod classifier;
pub mod hsv;
pub mod mask;
pub mod motion;
pub mod vitals;

use crate::capture::CaptureOutcome;
use crate::types::Observation;

pub use classifier::{ClassRule, ClassTable, PerceptionClassifier, PerceptionSettings};
pub use motion::{MotionEstimator, PositionSettings};
pub use vitals::{CalibrationReport, CalibrationRegion, VitalsEstimator, VitalsSettings};

/// Everything the capture task runs on a frame before handing it on.
pub struct Perception {
    pub classifier: PerceptionClassifier,
    pub vitals: VitalsEstimator,
    pub motion: MotionEstimator,
    roi: Option<crate::types::Rect>,
}

impl Perception {
    pub fn new(perception: &PerceptionSettings, vitals: &VitalsSettings, position: &PositionSettings) -> Self {
        Self {
            classifier: PerceptionClassifier::new(perception),
            vitals: VitalsEstimator::new(vitals),
            motion: MotionEstimator::new(position),
            roi: perception.roi,
        }
    }

    /// A degraded capture yields an empty, flagged observation with unknown
    /// vitals: nothing in a blanked frame is trusted.
    pub fn observe(&mut self, outcome: &CaptureOutcome) -> Observation {
        let frame = &outcome.frame;
        if outcome.degraded {
            return Observation::degraded(frame.strategy(), frame.captured_at());
        }
        let entities = self.classifier.classify(frame, self.roi);
        let vitals = self.vitals.estimate(frame, false);
        let mut obs = Observation::new(entities, vitals, frame.strategy(), frame.captured_at());
        obs.position = self.motion.observe(frame, false);
        obs
    }
}
