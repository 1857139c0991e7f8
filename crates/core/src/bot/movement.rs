use std::collections::VecDeque;

use crate::types::{Direction, PositionSample};

pub const POSITION_RING: usize = 10;

/// Bounded history of relative position estimates.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    samples: VecDeque<PositionSample>,
    min_delta: i32,
}

impl PositionTracker {
    pub fn new(min_delta: i32) -> Self {
        Self { samples: VecDeque::with_capacity(POSITION_RING), min_delta: min_delta.max(1) }
    }

    pub fn record(&mut self, sample: PositionSample) {
        if self.samples.len() == POSITION_RING {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<PositionSample> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the newest sample differs from `previous` on either axis.
    pub fn moved_since(&self, previous: &PositionSample) -> bool {
        self.latest().map_or(false, |cur| {
            (cur.x - previous.x).abs() >= self.min_delta || (cur.y - previous.y).abs() >= self.min_delta
        })
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckPhase {
    Cruising,
    Retrying,
    Escalating,
}

impl StuckPhase {
    pub fn name(self) -> &'static str {
        match self {
            StuckPhase::Cruising => "cruising",
            StuckPhase::Retrying => "retrying",
            StuckPhase::Escalating => "escalating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckState {
    pub attempts_without_progress: u8,
    /// Heading the rotation is measured from.
    pub current_direction: Direction,
    pub direction_cycle_index: u8,
    /// Last direction actually walked.
    pub last_emitted: Direction,
}

impl StuckState {
    pub fn new(heading: Direction) -> Self {
        Self {
            attempts_without_progress: 0,
            current_direction: heading,
            direction_cycle_index: 0,
            last_emitted: heading,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementDirective {
    pub direction: Direction,
    pub phase: StuckPhase,
}

/// Direction policy for when position samples show no progress.
///
/// Progress keeps the direction that produced it. Each tick without progress
/// turns one more quarter from the heading; once `threshold` ticks pass
/// without progress the bot reverses the heading outright.
#[derive(Debug, Clone)]
pub struct AntiStuck {
    state: StuckState,
    threshold: u8,
    phase: StuckPhase,
}

impl AntiStuck {
    pub fn new(heading: Direction, threshold: u8) -> Self {
        Self { state: StuckState::new(heading), threshold: threshold.max(1), phase: StuckPhase::Cruising }
    }

    pub fn state(&self) -> StuckState {
        self.state
    }

    pub fn phase(&self) -> StuckPhase {
        self.phase
    }

    pub fn on_tick(&mut self, moved: bool) -> MovementDirective {
        let (directive, next) = self.preview(Some(moved));
        self.apply(directive, next);
        directive
    }

    /// Directive and successor state without committing them. `None` means no
    /// position evidence either way: keep walking the last direction.
    pub fn preview(&self, moved: Option<bool>) -> (MovementDirective, StuckState) {
        let mut s = self.state;
        let (direction, phase) = match moved {
            None => (s.last_emitted, self.phase),
            Some(true) => {
                s.attempts_without_progress = 0;
                s.direction_cycle_index = 0;
                s.current_direction = s.last_emitted;
                (s.current_direction, StuckPhase::Cruising)
            }
            Some(false) => {
                s.attempts_without_progress = s.attempts_without_progress.saturating_add(1);
                if s.attempts_without_progress >= self.threshold {
                    s.current_direction = s.current_direction.opposite();
                    s.attempts_without_progress = 0;
                    s.direction_cycle_index = 0;
                    (s.current_direction, StuckPhase::Escalating)
                } else {
                    s.direction_cycle_index = (s.direction_cycle_index + 1) % 4;
                    (s.current_direction.rotated(s.direction_cycle_index as usize), StuckPhase::Retrying)
                }
            }
        };
        s.last_emitted = direction;
        (MovementDirective { direction, phase }, s)
    }

    pub fn apply(&mut self, directive: MovementDirective, next: StuckState) {
        self.state = next;
        self.phase = directive.phase;
    }
}
