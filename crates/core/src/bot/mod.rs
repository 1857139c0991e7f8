//! Observation → Action.

pub mod decision;
pub mod maplog;
pub mod movement;
pub mod state;

pub use decision::{BotConfig, Cooldowns, Decision, DecisionLoop, NoPlayersVisible, SafetyCheck, SpellConfig};
pub use maplog::{MapLogSettings, VisitedLog};
pub use movement::{AntiStuck, MovementDirective, PositionTracker, StuckPhase, StuckState};
pub use state::BotState;
