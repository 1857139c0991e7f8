use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::*;

use super::movement::{MovementDirective, StuckPhase, StuckState};
use super::state::BotState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cooldowns {
    pub attack: u64,
    pub heal: u64,
    pub mana: u64,
    pub food: u64,
    pub loot: u64,
    pub spell: u64,
    pub movement: u64,
}

impl Cooldowns {
    pub fn of(&self, category: ActionCategory) -> Duration {
        let ms = match category {
            ActionCategory::Attack => self.attack,
            ActionCategory::Heal => self.heal,
            ActionCategory::Mana => self.mana,
            ActionCategory::Food => self.food,
            ActionCategory::Loot => self.loot,
            ActionCategory::Spell => self.spell,
            ActionCategory::Movement => self.movement,
        };
        Duration::from_millis(ms)
    }
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            attack: 800,
            heal: 2000,
            mana: 2000,
            food: 300_000,
            loot: 500,
            spell: 1000,
            movement: 1500,
        }
    }
}

/// A support spell, cast whenever mana and its cooldown allow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellConfig {
    pub name: String,
    pub key: String,
    pub cooldown_ms: u64,
    /// Skip the cast below this mana; 0 casts without a mana reading.
    #[serde(default)]
    pub min_mana_pct: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub tick_ms: u64,
    pub heal_threshold: u8,
    pub mana_threshold: u8,
    /// Per-category cooldowns in milliseconds.
    pub cooldowns: Cooldowns,
    pub target_lock_ms: u64,
    pub loot_window_ms: u64,
    pub kill_confirm_ticks: u8,
    pub stuck_threshold: u8,
    pub initial_heading: Direction,
    /// Observations older than this are ignored.
    pub stale_after_ms: u64,
    pub keys: KeyBindings,
    pub spells: Vec<SpellConfig>,
    pub safety_enabled: bool,
}

impl BotConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            heal_threshold: 50,
            mana_threshold: 30,
            cooldowns: Cooldowns::default(),
            target_lock_ms: 20_000,
            loot_window_ms: 5000,
            kill_confirm_ticks: 2,
            stuck_threshold: 3,
            initial_heading: Direction::East,
            stale_after_ms: 2000,
            keys: KeyBindings::default(),
            spells: Vec::new(),
            safety_enabled: true,
        }
    }
}

/// Veto over attacking for one tick.
pub trait SafetyCheck: Send {
    fn name(&self) -> &'static str;
    fn allows_attack(&self, obs: &Observation) -> bool;
}

/// Do not engage while another player is on screen.
pub struct NoPlayersVisible;

impl SafetyCheck for NoPlayersVisible {
    fn name(&self) -> &'static str {
        "no_players_visible"
    }

    fn allows_attack(&self, obs: &Observation) -> bool {
        obs.players.is_empty()
    }
}

/// What one tick chose, plus what committing it changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub category: ActionCategory,
    pub action: Action,
    /// Index into `BotConfig::spells` for spell casts.
    pub spell: Option<usize>,
    /// Issuing this starts a target lock.
    pub locks_target: bool,
    pub movement: Option<(MovementDirective, StuckState)>,
}

impl Decision {
    fn new(category: ActionCategory, action: Action) -> Self {
        Self { category, action, spell: None, locks_target: false, movement: None }
    }
}

/// Priority state machine: one tick, at most one action.
///
/// `tick` only inspects; `commit` applies the chosen decision's effects once
/// the executor reports success, so a failed action is simply chosen again.
pub struct DecisionLoop {
    config: BotConfig,
    state: BotState,
    safety: Option<Box<dyn SafetyCheck>>,
}

impl DecisionLoop {
    pub fn new(config: BotConfig, safety: Option<Box<dyn SafetyCheck>>) -> Self {
        let state = BotState::new(config.initial_heading, config.stuck_threshold, config.spells.len());
        Self { config, state, safety }
    }

    /// Loop with the safety check the config asks for.
    pub fn from_config(config: BotConfig) -> Self {
        let safety: Option<Box<dyn SafetyCheck>> = if config.safety_enabled {
            Some(Box::new(NoPlayersVisible))
        } else {
            None
        };
        Self::new(config, safety)
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    /// Feed the newest available observation (if any) and pick an action.
    pub fn tick(&mut self, obs: Option<&Observation>, now: Instant) -> Option<Decision> {
        let stale = self.config.stale_after();
        let obs = obs.filter(|o| o.age(now) <= stale);
        if let Some(o) = obs {
            self.absorb(o);
        }
        if let Some(until) = self.state.target_locked_until {
            if now >= until {
                self.state.release_target();
            }
        }

        let trusted = obs.filter(|o| !o.degraded);
        let cfg = &self.config;
        let st = &self.state;
        let ready = |cat: ActionCategory| st.ready(cat, cfg.cooldowns.of(cat), now);

        // 1. loot right after a kill
        if st.loot_pending {
            let fresh = st
                .last_kill
                .map_or(false, |at| now.saturating_duration_since(at) <= Duration::from_millis(cfg.loot_window_ms));
            if !fresh {
                self.state.loot_pending = false;
            } else if ready(ActionCategory::Loot) {
                return Some(Decision::new(ActionCategory::Loot, Action::PressKey(cfg.keys.loot.clone())));
            }
        }
        let st = &self.state;
        let ready = |cat: ActionCategory| st.ready(cat, cfg.cooldowns.of(cat), now);

        // 2. food
        if let Some(food) = &cfg.keys.food {
            if ready(ActionCategory::Food) {
                return Some(Decision::new(ActionCategory::Food, Action::PressKey(food.clone())));
            }
        }

        if let Some(o) = trusted {
            // 3. heal, 4. mana
            if o.health_measured && o.health_pct < cfg.heal_threshold && ready(ActionCategory::Heal) {
                return Some(Decision::new(ActionCategory::Heal, Action::PressKey(cfg.keys.heal.clone())));
            }
            if o.mana_measured && o.mana_pct < cfg.mana_threshold && ready(ActionCategory::Mana) {
                return Some(Decision::new(ActionCategory::Mana, Action::PressKey(cfg.keys.mana.clone())));
            }
        }

        let vetoed = trusted.map_or(false, |o| self.safety.as_ref().map_or(false, |s| !s.allows_attack(o)));
        if let Some(o) = trusted.filter(|_| !vetoed) {
            // 5. attack
            if ready(ActionCategory::Attack) {
                if st.is_locked() {
                    return Some(Decision::new(ActionCategory::Attack, Action::PressKey(cfg.keys.attack.clone())));
                }
                if let Some(target) = o.enemies.first() {
                    let (x, y) = target.center();
                    let mut d = Decision::new(ActionCategory::Attack, Action::Click { x, y, button: MouseButton::Left });
                    d.locks_target = true;
                    return Some(d);
                }
            }
        }

        if let Some(o) = trusted {
            // 6. support spells, in or out of combat
            if ready(ActionCategory::Spell) {
                for (i, spell) in cfg.spells.iter().enumerate() {
                    let off_cooldown = st.spell_last_cast[i]
                        .map_or(true, |at| now.saturating_duration_since(at) >= Duration::from_millis(spell.cooldown_ms));
                    let mana_ok = spell.min_mana_pct == 0 || (o.mana_measured && o.mana_pct >= spell.min_mana_pct);
                    if off_cooldown && mana_ok {
                        let mut d = Decision::new(ActionCategory::Spell, Action::PressKey(spell.key.clone()));
                        d.spell = Some(i);
                        return Some(d);
                    }
                }
            }
        }

        // 7. movement when nothing is worth fighting, or nothing can be seen
        let enemies_in_view = trusted.map_or(false, |o| !o.enemies.is_empty());
        let may_move = vetoed || trusted.is_none() || (!enemies_in_view && !st.is_locked());
        if may_move && ready(ActionCategory::Movement) {
            let moved = match (st.move_baseline, st.tracker.latest()) {
                (Some(base), Some(cur)) if cur.at > base.at => Some(st.tracker.moved_since(&base)),
                _ => None,
            };
            let (directive, next) = st.anti_stuck.preview(moved);
            let mut d = Decision::new(ActionCategory::Movement, Action::MoveDirection(directive.direction));
            d.movement = Some((directive, next));
            return Some(d);
        }
        None
    }

    /// Apply the effects of a decision whose action was delivered.
    pub fn commit(&mut self, decision: &Decision, now: Instant) {
        let st = &mut self.state;
        st.mark(decision.category, now);
        st.last_action_desc = Some((decision.category, decision.action.to_string()));

        match decision.category {
            ActionCategory::Loot => st.loot_pending = false,
            ActionCategory::Attack if decision.locks_target => {
                st.target_locked_until = Some(now + Duration::from_millis(self.config.target_lock_ms));
                st.in_combat = true;
                st.empty_ticks = 0;
            }
            ActionCategory::Spell => {
                if let Some(slot) = decision.spell.and_then(|i| st.spell_last_cast.get_mut(i)) {
                    *slot = Some(now);
                }
            }
            ActionCategory::Movement => {
                if let Some((directive, next)) = decision.movement {
                    st.anti_stuck.apply(directive, next);
                }
                st.move_baseline = st.tracker.latest();
            }
            _ => {}
        }
    }

    /// Per-observation bookkeeping, once per captured frame.
    fn absorb(&mut self, obs: &Observation) {
        let st = &mut self.state;
        let seen = st.last_observation.as_ref().map(|o| o.source_frame_timestamp);
        if seen == Some(obs.source_frame_timestamp) {
            return;
        }
        st.last_observation = Some(obs.clone());
        if let Some(sample) = obs.position {
            st.tracker.record(sample);
        }
        if obs.degraded || !st.is_locked() {
            return;
        }
        if obs.enemies.is_empty() {
            st.empty_ticks = st.empty_ticks.saturating_add(1);
            if st.empty_ticks >= self.config.kill_confirm_ticks.max(1) {
                st.release_target();
                st.kills += 1;
                st.last_kill = Some(obs.source_frame_timestamp);
                st.loot_pending = true;
            }
        } else {
            st.empty_ticks = 0;
        }
    }

    pub fn snapshot(&self, now: Instant) -> BotSnapshot {
        let st = &self.state;
        let obs = st.last_observation.as_ref();
        let stuck = st.anti_stuck.state();
        BotSnapshot {
            in_combat: st.in_combat,
            target_lock_remaining: st.lock_remaining(now),
            last_action: st.last_action_desc.clone(),
            health_pct: obs.filter(|o| o.health_measured && !o.degraded).map(|o| o.health_pct),
            mana_pct: obs.filter(|o| o.mana_measured && !o.degraded).map(|o| o.mana_pct),
            enemies: obs.map_or(0, |o| o.enemies.len()),
            players: obs.map_or(0, |o| o.players.len()),
            degraded: obs.map_or(false, |o| o.degraded),
            position: st.tracker.latest().map(|p| (p.x, p.y)),
            stuck_phase: match st.anti_stuck.phase() {
                StuckPhase::Cruising => StuckPhase::Cruising.name().to_string(),
                phase => format!("{} ({} without progress)", phase.name(), stuck.attempts_without_progress),
            },
            heading: Some(stuck.last_emitted),
            kills: st.kills,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: i32, y: i32, w: u32, h: u32) -> Region {
        Region { bbox: Rect::new(x, y, w, h), area: w * h }
    }

    struct Obs {
        at: Instant,
        enemies: Vec<Region>,
        players: Vec<Region>,
        health: Option<u8>,
        mana: Option<u8>,
        degraded: bool,
        position: Option<(i32, i32)>,
    }

    impl Obs {
        fn at(at: Instant) -> Self {
            Self { at, enemies: vec![], players: vec![], health: Some(100), mana: Some(100), degraded: false, position: None }
        }

        fn enemy(mut self) -> Self {
            self.enemies.push(region(100, 80, 30, 30));
            self
        }

        fn build(self) -> Observation {
            let vitals = Vitals {
                health_pct: self.health.unwrap_or(100),
                mana_pct: self.mana.unwrap_or(100),
                health_measured: self.health.is_some(),
                mana_measured: self.mana.is_some(),
            };
            let lists = EntityLists { enemies: self.enemies, players: self.players, ..Default::default() };
            let mut o = Observation::new(lists, vitals, "test", self.at);
            o.degraded = self.degraded;
            o.position = self.position.map(|(x, y)| PositionSample { x, y, at: self.at });
            o
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn bot() -> DecisionLoop {
        DecisionLoop::from_config(BotConfig::default())
    }

    /// Tick and commit as the pipeline does when the executor succeeds.
    fn step(bot: &mut DecisionLoop, obs: &Observation, now: Instant) -> Option<Decision> {
        let d = bot.tick(Some(obs), now)?;
        bot.commit(&d, now);
        Some(d)
    }

    #[test]
    fn heal_beats_attack() {
        let t0 = Instant::now();
        let mut bot = bot();
        let obs = Obs { health: Some(20), ..Obs::at(t0) }.enemy().build();
        let d = bot.tick(Some(&obs), t0).unwrap();
        assert_eq!(d.category, ActionCategory::Heal);
        assert_eq!(d.action, Action::PressKey("f1".into()));
    }

    #[test]
    fn heal_cooldown_lets_attack_through() {
        let t0 = Instant::now();
        let mut bot = bot();
        let obs = Obs { health: Some(20), ..Obs::at(t0) }.enemy().build();
        step(&mut bot, &obs, t0);
        let d = bot.tick(Some(&obs), t0 + ms(100)).unwrap();
        assert_eq!(d.category, ActionCategory::Attack);
        let d = bot.tick(Some(&obs), t0 + ms(2000)).unwrap();
        assert_eq!(d.category, ActionCategory::Heal);
    }

    #[test]
    fn unmeasured_health_never_heals() {
        let t0 = Instant::now();
        let mut bot = bot();
        let obs = Obs { health: None, ..Obs::at(t0) }.enemy().build();
        assert_eq!(bot.tick(Some(&obs), t0).unwrap().category, ActionCategory::Attack);
    }

    #[test]
    fn attack_clicks_most_salient_then_holds_lock() {
        let t0 = Instant::now();
        let mut bot = bot();
        let mut obs = Obs::at(t0).build();
        obs.enemies = vec![region(200, 100, 40, 40), region(10, 10, 12, 12)];

        let d = step(&mut bot, &obs, t0).unwrap();
        assert_eq!(d.action, Action::Click { x: 220, y: 120, button: MouseButton::Left });
        assert!(bot.state().in_combat);
        assert_eq!(bot.state().lock_remaining(t0), Some(ms(20_000)));

        // Cooldown: nothing to do, and no movement while locked
        assert!(bot.tick(Some(&obs), t0 + ms(100)).is_none());
        let d = bot.tick(Some(&obs), t0 + ms(800)).unwrap();
        assert_eq!(d.action, Action::PressKey("1".into()));
    }

    #[test]
    fn lock_expires_and_rescans() {
        let t0 = Instant::now();
        let mut bot = bot();
        let obs = Obs::at(t0).enemy().build();
        step(&mut bot, &obs, t0);
        let later = t0 + ms(20_001);
        let fresh = Obs::at(later).enemy().build();
        let d = bot.tick(Some(&fresh), later).unwrap();
        assert!(matches!(d.action, Action::Click { .. }));
    }

    #[test]
    fn kill_is_confirmed_then_looted_once() {
        let t0 = Instant::now();
        let mut bot = bot();
        step(&mut bot, &Obs::at(t0).enemy().build(), t0);

        // one empty observation is not enough
        let frame1 = Obs::at(t0 + ms(100)).build();
        bot.tick(Some(&frame1), t0 + ms(100));
        assert!(bot.state().is_locked());
        // the same observation seen again does not count twice
        bot.tick(Some(&frame1), t0 + ms(150));
        assert!(bot.state().is_locked());

        let frame2 = Obs::at(t0 + ms(200)).build();
        let d = step(&mut bot, &frame2, t0 + ms(200)).unwrap();
        assert_eq!(d.category, ActionCategory::Loot);
        assert_eq!(bot.state().kills, 1);
        assert!(!bot.state().is_locked());

        let d = bot.tick(Some(&frame2), t0 + ms(900)).unwrap();
        assert_eq!(d.category, ActionCategory::Movement);
    }

    #[test]
    fn degraded_frames_suppress_combat_but_not_movement() {
        let t0 = Instant::now();
        let mut bot = bot();
        let mut obs = Obs { health: Some(5), ..Obs::at(t0) }.enemy().build();
        obs.degraded = true;
        let d = bot.tick(Some(&obs), t0).unwrap();
        assert_eq!(d.category, ActionCategory::Movement);

        // and an empty degraded frame while locked is not a kill
        let mut bot = self::bot();
        step(&mut bot, &Obs::at(t0).enemy().build(), t0);
        for i in 1..5 {
            let mut blank = Obs::at(t0 + ms(i * 100)).build();
            blank.degraded = true;
            bot.tick(Some(&blank), t0 + ms(i * 100));
        }
        assert!(bot.state().is_locked());
        assert_eq!(bot.state().kills, 0);
    }

    #[test]
    fn visible_player_vetoes_attack_and_falls_through_to_movement() {
        let t0 = Instant::now();
        let mut bot = bot();
        let mut obs = Obs::at(t0).enemy().build();
        obs.players.push(region(300, 200, 20, 40));
        let d = bot.tick(Some(&obs), t0).unwrap();
        assert_eq!(d.category, ActionCategory::Movement);

        let mut unsafe_bot = DecisionLoop::new(BotConfig::default(), None);
        assert_eq!(unsafe_bot.tick(Some(&obs), t0).unwrap().category, ActionCategory::Attack);
    }

    #[test]
    fn failed_action_is_retried_next_tick() {
        let t0 = Instant::now();
        let mut bot = bot();
        let obs = Obs { health: Some(10), ..Obs::at(t0) }.build();
        let first = bot.tick(Some(&obs), t0).unwrap();
        // executor failed: no commit
        let second = bot.tick(Some(&obs), t0 + ms(100)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stale_or_missing_observation_only_moves() {
        let t0 = Instant::now();
        let mut bot = bot();
        let old = Obs { health: Some(10), ..Obs::at(t0) }.enemy().build();
        let d = bot.tick(Some(&old), t0 + ms(5000)).unwrap();
        assert_eq!(d.category, ActionCategory::Movement);
        let mut bot = self::bot();
        assert_eq!(bot.tick(None, t0).unwrap().category, ActionCategory::Movement);
    }

    #[test]
    fn food_runs_on_its_own_cadence() {
        let t0 = Instant::now();
        let mut cfg = BotConfig::default();
        cfg.keys.food = Some("f9".into());
        let mut bot = DecisionLoop::from_config(cfg);
        let obs = Obs::at(t0).enemy().build();
        assert_eq!(step(&mut bot, &obs, t0).unwrap().category, ActionCategory::Food);
        assert_eq!(step(&mut bot, &obs, t0 + ms(100)).unwrap().category, ActionCategory::Attack);
        let d = bot.tick(Some(&obs), t0 + ms(300_000)).unwrap();
        assert_eq!(d.category, ActionCategory::Food);
    }

    #[test]
    fn spells_need_mana_and_cooldown() {
        let t0 = Instant::now();
        let mut cfg = BotConfig::default();
        cfg.spells = vec![
            SpellConfig { name: "shield".into(), key: "3".into(), cooldown_ms: 10_000, min_mana_pct: 40 },
            SpellConfig { name: "haste".into(), key: "4".into(), cooldown_ms: 5000, min_mana_pct: 0 },
        ];
        let mut bot = DecisionLoop::from_config(cfg);
        step(&mut bot, &Obs::at(t0).enemy().build(), t0);

        let low_mana = Obs { mana: Some(35), ..Obs::at(t0 + ms(100)) }.enemy().build();
        let d = step(&mut bot, &low_mana, t0 + ms(100)).unwrap();
        assert_eq!(d.spell, Some(1));

        let full = Obs::at(t0 + ms(1200)).enemy().build();
        // attack is ready again and outranks spells
        assert_eq!(step(&mut bot, &full, t0 + ms(1200)).unwrap().category, ActionCategory::Attack);
        let d = step(&mut bot, &full, t0 + ms(1300)).unwrap();
        assert_eq!(d.spell, Some(0));
        assert!(bot.tick(Some(&full), t0 + ms(1400)).is_none());
    }

    #[test]
    fn support_spell_is_cast_while_roaming() {
        let t0 = Instant::now();
        let mut cfg = BotConfig::default();
        cfg.spells = vec![SpellConfig { name: "haste".into(), key: "4".into(), cooldown_ms: 5000, min_mana_pct: 10 }];
        let mut bot = DecisionLoop::from_config(cfg);
        let obs = Obs::at(t0).build();
        let d = step(&mut bot, &obs, t0).unwrap();
        assert_eq!(d.category, ActionCategory::Spell);
        assert_eq!(d.action, Action::PressKey("4".into()));
        assert!(!bot.state().is_locked());
        assert_eq!(bot.tick(Some(&obs), t0 + ms(100)).unwrap().category, ActionCategory::Movement);
    }

    #[test]
    fn blank_frames_while_locked_keep_the_bot_moving() {
        let t0 = Instant::now();
        let mut bot = bot();
        step(&mut bot, &Obs::at(t0).enemy().build(), t0);
        assert!(bot.state().is_locked());

        let mut moves = 0;
        for i in 1..50u64 {
            let now = t0 + ms(i * 200);
            let blank = Observation::degraded("test", now);
            if let Some(d) = step(&mut bot, &blank, now) {
                assert_eq!(d.category, ActionCategory::Movement);
                moves += 1;
            }
        }
        // one move per movement cooldown over ~10s
        assert!(moves >= 6, "{} moves", moves);
        assert_eq!(bot.state().kills, 0);
    }

    #[test]
    fn no_progress_escalates_to_reverse_heading() {
        let t0 = Instant::now();
        let mut bot = bot();
        let mut directions = Vec::new();
        for i in 0..4u64 {
            let now = t0 + ms(i * 1500);
            let obs = Obs { position: Some((0, 0)), ..Obs::at(now) }.build();
            let d = step(&mut bot, &obs, now).unwrap();
            directions.push((d.action.clone(), d.movement.unwrap().0.phase));
        }
        assert_eq!(directions[0], (Action::MoveDirection(Direction::East), StuckPhase::Cruising));
        assert_eq!(directions[1].1, StuckPhase::Retrying);
        assert_eq!(directions[3], (Action::MoveDirection(Direction::West), StuckPhase::Escalating));
    }

    #[test]
    fn progress_keeps_heading() {
        let t0 = Instant::now();
        let mut bot = bot();
        for i in 0..4u64 {
            let now = t0 + ms(i * 1500);
            let obs = Obs { position: Some((i as i32 * 24, 0)), ..Obs::at(now) }.build();
            let d = step(&mut bot, &obs, now).unwrap();
            assert_eq!(d.action, Action::MoveDirection(Direction::East));
        }
    }
}
