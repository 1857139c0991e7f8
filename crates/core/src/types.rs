use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::capture::StrategyReport;
use crate::vision::vitals::CalibrationReport;

/// Window identifier (HWND on Windows, CGWindowID on macOS)
pub type WindowId = u64;

/// Axis-aligned pixel rectangle.
///
/// Window bounds are in screen space; detections and calibration rectangles
/// are relative to the captured frame (the window's client area).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> i32 {
        self.x + self.w as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h as i32
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w as i32 / 2, self.y + self.h as i32 / 2)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let l = self.x.max(other.x);
        let t = self.y.max(other.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        if r <= l || b <= t {
            return None;
        }
        Some(Rect::new(l, t, (r - l) as u32, (b - t) as u32))
    }

    /// Clip to a `width` x `height` surface anchored at the origin.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        self.intersect(&Rect::new(0, 0, width, height))
    }

    /// Sub-rectangle given as fractions of this one (used for HUD candidates).
    pub fn fraction(&self, fx: f32, fy: f32, fw: f32, fh: f32) -> Rect {
        Rect::new(
            self.x + (self.w as f32 * fx) as i32,
            self.y + (self.h as f32 * fy) as i32,
            (self.w as f32 * fw) as u32,
            (self.h as f32 * fh) as u32,
        )
    }
}

/// One entity candidate produced by the perception classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub bbox: Rect,
    /// Pixel count of the connected component, the salience score.
    pub area: u32,
}

impl Region {
    pub fn center(&self) -> (i32, i32) {
        self.bbox.center()
    }

    /// Fraction of the bounding box covered by the component.
    pub fn fill(&self) -> f32 {
        let bbox = self.bbox.area();
        if bbox == 0 {
            0.0
        } else {
            self.area as f32 / bbox as f32
        }
    }
}

/// Movement heading in screen terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Fixed clockwise rotation used by anti-stuck cycling.
    pub const ROTATION: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
        }
    }

    /// Direction `steps` quarter turns clockwise from this one.
    pub fn rotated(self, steps: usize) -> Direction {
        Self::ROTATION[(self.index() + steps) % 4]
    }

    pub fn opposite(self) -> Direction {
        self.rotated(2)
    }

    /// Unit vector in screen coordinates (y grows downward).
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
}

/// One synthetic input event for the ActionExecutor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PressKey(String),
    /// Click at frame (client-area) coordinates.
    Click { x: i32, y: i32, button: MouseButton },
    MoveDirection(Direction),
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::PressKey(key) => write!(f, "press {}", key),
            Action::Click { x, y, button } => write!(f, "click {:?} at ({}, {})", button, x, y),
            Action::MoveDirection(dir) => write!(f, "move {}", dir.name()),
        }
    }
}

/// Categories tracked for per-category cooldowns, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Loot,
    Food,
    Heal,
    Mana,
    Attack,
    Spell,
    Movement,
}

impl ActionCategory {
    pub const COUNT: usize = 7;

    pub const ALL: [ActionCategory; Self::COUNT] = [
        ActionCategory::Loot,
        ActionCategory::Food,
        ActionCategory::Heal,
        ActionCategory::Mana,
        ActionCategory::Attack,
        ActionCategory::Spell,
        ActionCategory::Movement,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionCategory::Loot => "loot",
            ActionCategory::Food => "food",
            ActionCategory::Heal => "heal",
            ActionCategory::Mana => "mana",
            ActionCategory::Attack => "attack",
            ActionCategory::Spell => "spell",
            ActionCategory::Movement => "movement",
        }
    }
}

/// Relative position estimate; only differences between samples mean anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSample {
    pub x: i32,
    pub y: i32,
    pub at: Instant,
}

/// HUD vitals. `*_measured == false` means the value is the conservative
/// 100% default, not a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vitals {
    pub health_pct: u8,
    pub mana_pct: u8,
    pub health_measured: bool,
    pub mana_measured: bool,
}

impl Vitals {
    pub const UNKNOWN: Vitals = Vitals {
        health_pct: 100,
        mana_pct: 100,
        health_measured: false,
        mana_measured: false,
    };
}

/// Entity candidate lists for one frame, each sorted by area descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityLists {
    pub enemies: Vec<Region>,
    pub stairs: Vec<Region>,
    pub portals: Vec<Region>,
    pub obstacles: Vec<Region>,
    pub players: Vec<Region>,
}

/// Per-tick perception snapshot. No identity across ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub enemies: Vec<Region>,
    pub stairs: Vec<Region>,
    pub portals: Vec<Region>,
    pub obstacles: Vec<Region>,
    pub players: Vec<Region>,
    pub health_pct: u8,
    pub mana_pct: u8,
    pub health_measured: bool,
    pub mana_measured: bool,
    pub position: Option<PositionSample>,
    /// Set when the frame behind this observation was near-blank.
    pub degraded: bool,
    pub strategy: &'static str,
    pub source_frame_timestamp: Instant,
}

impl Observation {
    pub fn new(entities: EntityLists, vitals: Vitals, strategy: &'static str, at: Instant) -> Self {
        Self {
            enemies: entities.enemies,
            stairs: entities.stairs,
            portals: entities.portals,
            obstacles: entities.obstacles,
            players: entities.players,
            health_pct: vitals.health_pct,
            mana_pct: vitals.mana_pct,
            health_measured: vitals.health_measured,
            mana_measured: vitals.mana_measured,
            position: None,
            degraded: false,
            strategy,
            source_frame_timestamp: at,
        }
    }

    /// Observation for a frame that carries no reliable signal.
    pub fn degraded(strategy: &'static str, at: Instant) -> Self {
        Self {
            degraded: true,
            ..Self::new(EntityLists::default(), Vitals::UNKNOWN, strategy, at)
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.source_frame_timestamp)
    }
}

/// Keys the decision loop presses. Key names are platform-neutral
/// ("f1", "1", "space", "shift+q").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub attack: String,
    pub heal: String,
    pub mana: String,
    pub food: Option<String>,
    pub loot: String,
    pub movement: MovementKeys,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            attack: "1".into(),
            heal: "f1".into(),
            mana: "f2".into(),
            food: None,
            loot: "space".into(),
            movement: MovementKeys::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementKeys {
    pub north: String,
    pub east: String,
    pub south: String,
    pub west: String,
    /// How long a movement key is held down.
    pub hold_ms: u64,
}

impl MovementKeys {
    pub fn key_for(&self, dir: Direction) -> &str {
        match dir {
            Direction::North => &self.north,
            Direction::East => &self.east,
            Direction::South => &self.south,
            Direction::West => &self.west,
        }
    }
}

impl Default for MovementKeys {
    fn default() -> Self {
        Self {
            north: "w".into(),
            east: "d".into(),
            south: "s".into(),
            west: "a".into(),
            hold_ms: 400,
        }
    }
}

/// Read-only view of the decision loop, handed out by value.
#[derive(Debug, Clone, Default)]
pub struct BotSnapshot {
    pub window_title: Option<String>,
    pub in_combat: bool,
    pub target_lock_remaining: Option<Duration>,
    pub last_action: Option<(ActionCategory, String)>,
    pub health_pct: Option<u8>,
    pub mana_pct: Option<u8>,
    pub enemies: usize,
    pub players: usize,
    pub degraded: bool,
    pub position: Option<(i32, i32)>,
    pub stuck_phase: String,
    pub heading: Option<Direction>,
    pub kills: u32,
    pub strategies: Vec<StrategyReport>,
    pub calibration: Option<CalibrationReport>,
}

/// Pipeline lifecycle as seen by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

/// Command from the front end to the supervisor
pub enum Command {
    StartStop,
    Calibrate,
    SaveCalibration,
    Quit,
}
