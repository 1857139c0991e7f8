use std::time::{Duration, Instant};

use crate::types::{ActionCategory, Direction, Observation, PositionSample};

use super::movement::{AntiStuck, PositionTracker};

/// The decision loop's private record. Only the decision thread touches it.
#[derive(Debug, Clone)]
pub struct BotState {
    pub in_combat: bool,
    pub target_locked_until: Option<Instant>,
    last_action: [Option<Instant>; ActionCategory::COUNT],
    pub spell_last_cast: Vec<Option<Instant>>,
    pub tracker: PositionTracker,
    pub anti_stuck: AntiStuck,
    /// Position when the last movement was issued.
    pub move_baseline: Option<PositionSample>,
    /// Consecutive new, trusted observations with no enemy while locked.
    pub empty_ticks: u8,
    pub last_kill: Option<Instant>,
    pub loot_pending: bool,
    pub kills: u32,
    pub last_observation: Option<Observation>,
    pub last_action_desc: Option<(ActionCategory, String)>,
}

impl BotState {
    pub fn new(heading: Direction, stuck_threshold: u8, spells: usize) -> Self {
        Self {
            in_combat: false,
            target_locked_until: None,
            last_action: [None; ActionCategory::COUNT],
            spell_last_cast: vec![None; spells],
            tracker: PositionTracker::default(),
            anti_stuck: AntiStuck::new(heading, stuck_threshold),
            move_baseline: None,
            empty_ticks: 0,
            last_kill: None,
            loot_pending: false,
            kills: 0,
            last_observation: None,
            last_action_desc: None,
        }
    }

    pub fn last(&self, category: ActionCategory) -> Option<Instant> {
        self.last_action[category.index()]
    }

    /// Monotonic cooldown check; a category never used is always ready.
    pub fn ready(&self, category: ActionCategory, cooldown: Duration, now: Instant) -> bool {
        self.last(category).map_or(true, |at| now.saturating_duration_since(at) >= cooldown)
    }

    pub fn mark(&mut self, category: ActionCategory, now: Instant) {
        self.last_action[category.index()] = Some(now);
    }

    pub fn is_locked(&self) -> bool {
        self.target_locked_until.is_some()
    }

    pub fn lock_remaining(&self, now: Instant) -> Option<Duration> {
        self.target_locked_until.map(|until| until.saturating_duration_since(now))
    }

    pub fn release_target(&mut self) {
        self.target_locked_until = None;
        self.in_combat = false;
        self.empty_ticks = 0;
    }
}
