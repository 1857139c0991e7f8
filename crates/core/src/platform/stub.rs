//! Synthetic platform: a small rendered arena with a textured floor, red
//! enemies and HUD bars, driven by the same actions a real client gets.
//!
//! The first strategy always returns a black frame, mimicking a client that
//! blanks GDI captures, so the selector's fallback is exercised end to end.

use std::sync::{Arc, Mutex, MutexGuard};

use image::{Rgb, RgbImage};
use regex::Regex;

use crate::capture::{CaptureStrategy, Frame};
use crate::error::{ActionError, CaptureError};
use crate::logger;
use crate::types::*;
use super::{ActionExecutor, Platform, WindowHandle};

pub const VIEW_W: u32 = 640;
pub const VIEW_H: u32 = 360;
const WORLD: i32 = 2400;
const STEP: i32 = 24;
const ENEMY_SIZE: i32 = 24;
const CELL: i32 = 20;
const STUB_WINDOW_ID: WindowId = 40001;
const STUB_TITLE: &str = "Dungeon Online (stub)";

pub const HEALTH_BAR: Rect = Rect::new(10, 10, 200, 6);
pub const MANA_BAR: Rect = Rect::new(10, 22, 200, 6);

#[derive(Debug, Clone)]
struct Enemy {
    x: i32,
    y: i32,
    hp: i32,
}

#[derive(Debug)]
pub struct Scene {
    camera: (i32, i32),
    enemies: Vec<Enemy>,
    selected: Option<usize>,
    health: u8,
    mana: u8,
    spawned: u32,
    /// Actions delivered so far.
    pub actions: u64,
    pub kills: u32,
    pub closed: bool,
}

impl Scene {
    pub fn new() -> Self {
        let mut scene = Self {
            camera: (WORLD / 2, WORLD / 2),
            enemies: Vec::new(),
            selected: None,
            health: 100,
            mana: 100,
            spawned: 0,
            actions: 0,
            kills: 0,
            closed: false,
        };
        scene.respawn();
        scene
    }

    pub fn camera(&self) -> (i32, i32) {
        self.camera
    }

    pub fn set_vitals(&mut self, health: u8, mana: u8) {
        self.health = health.min(100);
        self.mana = mana.min(100);
    }

    pub fn vitals(&self) -> (u8, u8) {
        (self.health, self.mana)
    }

    /// Empty the arena until the next kill respawns it.
    pub fn clear_enemies(&mut self) {
        self.enemies.clear();
        self.selected = None;
    }

    fn respawn(&mut self) {
        while self.enemies.len() < 3 {
            let h = hash(self.spawned as i32, 7);
            self.spawned += 1;
            let x = self.camera.0 + (h % 1200) as i32 - 300;
            let y = self.camera.1 + ((h >> 12) % 700) as i32 - 170;
            self.enemies.push(Enemy {
                x: x.clamp(0, WORLD - ENEMY_SIZE),
                y: y.clamp(0, WORLD - ENEMY_SIZE),
                hp: 100,
            });
        }
    }

    pub fn render(&self) -> RgbImage {
        let (cx, cy) = self.camera;
        let mut img = RgbImage::from_fn(VIEW_W, VIEW_H, |x, y| {
            let wx = cx + x as i32;
            let wy = cy + y as i32;
            let shade = hash(wx.div_euclid(CELL), wy.div_euclid(CELL));
            // Dark stone: below every class's value floor
            Rgb([30 + (shade % 20) as u8, 32 + ((shade >> 5) % 20) as u8, 28 + ((shade >> 10) % 20) as u8])
        });

        for enemy in &self.enemies {
            fill(&mut img, Rect::new(enemy.x - cx, enemy.y - cy, ENEMY_SIZE as u32, ENEMY_SIZE as u32), Rgb([200, 30, 30]));
        }

        bar(&mut img, HEALTH_BAR, self.health, Rgb([200, 20, 20]));
        bar(&mut img, MANA_BAR, self.mana, Rgb([20, 40, 210]));
        img
    }

    fn enemy_at(&self, x: i32, y: i32) -> Option<usize> {
        let (cx, cy) = self.camera;
        self.enemies.iter().position(|e| {
            Rect::new(e.x - cx, e.y - cy, ENEMY_SIZE as u32, ENEMY_SIZE as u32).contains(x, y)
        })
    }

    fn apply(&mut self, action: &Action, keys: &KeyBindings) {
        self.actions += 1;
        match action {
            Action::MoveDirection(dir) => {
                let (dx, dy) = dir.delta();
                let max = WORLD - VIEW_W.max(VIEW_H) as i32;
                self.camera.0 = (self.camera.0 + dx * STEP).clamp(0, max);
                self.camera.1 = (self.camera.1 + dy * STEP).clamp(0, max);
            }
            Action::Click { x, y, .. } => {
                self.selected = self.enemy_at(*x, *y);
            }
            Action::PressKey(key) if *key == keys.attack => {
                let Some(idx) = self.selected else { return };
                if let Some(enemy) = self.enemies.get_mut(idx) {
                    enemy.hp -= 34;
                    self.health = self.health.saturating_sub(6);
                    if enemy.hp <= 0 {
                        self.enemies.remove(idx);
                        self.selected = None;
                        self.kills += 1;
                        self.respawn();
                    }
                }
            }
            Action::PressKey(key) if *key == keys.heal => {
                self.health = (self.health + 40).min(100);
            }
            Action::PressKey(key) if *key == keys.mana => {
                self.mana = (self.mana + 40).min(100);
            }
            Action::PressKey(_) => {
                self.mana = self.mana.saturating_sub(5);
            }
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

fn hash(a: i32, b: i32) -> u32 {
    let mut h = (a as u32).wrapping_mul(0x9E37_79B1) ^ (b as u32).wrapping_mul(0x85EB_CA77);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    h
}

fn fill(img: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let Some(r) = rect.clamp_to(img.width(), img.height()) else { return };
    for y in r.y..r.bottom() {
        for x in r.x..r.right() {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn bar(img: &mut RgbImage, rect: Rect, pct: u8, color: Rgb<u8>) {
    fill(img, rect, Rgb([40, 40, 40]));
    let filled = rect.w * pct.min(100) as u32 / 100;
    fill(img, Rect { w: filled, ..rect }, color);
}

fn lock(scene: &Mutex<Scene>) -> MutexGuard<'_, Scene> {
    scene.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct StubPlatform {
    scene: Arc<Mutex<Scene>>,
}

impl StubPlatform {
    pub fn new() -> Self {
        Self { scene: Arc::new(Mutex::new(Scene::new())) }
    }

    /// Shared scene, for tests and harnesses that inspect the arena.
    pub fn scene(&self) -> Arc<Mutex<Scene>> {
        Arc::clone(&self.scene)
    }
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for StubPlatform {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn find_windows(&self, pattern: &Regex) -> Vec<(WindowId, String)> {
        logger::info_p("stub", &format!("find_windows(\"{}\")", pattern));
        if lock(&self.scene).closed {
            return Vec::new();
        }
        // The stub window answers to every pattern
        vec![(STUB_WINDOW_ID, STUB_TITLE.to_string())]
    }

    fn window(&self, window_id: WindowId) -> Arc<dyn WindowHandle> {
        Arc::new(StubWindow { window_id, scene: Arc::clone(&self.scene) })
    }

    fn strategies(&self) -> Vec<Arc<dyn CaptureStrategy>> {
        vec![
            Arc::new(StubCapture { name: "stub_blocked", blank: true, scene: Arc::clone(&self.scene) }),
            Arc::new(StubCapture { name: "stub_render", blank: false, scene: Arc::clone(&self.scene) }),
        ]
    }

    fn executor(&self, window: Arc<dyn WindowHandle>, keys: &KeyBindings) -> Box<dyn ActionExecutor> {
        logger::info_p("stub", &format!("executor for window {}", window.id()));
        Box::new(StubExecutor { scene: Arc::clone(&self.scene), keys: keys.clone() })
    }
}

struct StubWindow {
    window_id: WindowId,
    scene: Arc<Mutex<Scene>>,
}

impl WindowHandle for StubWindow {
    fn id(&self) -> WindowId {
        self.window_id
    }

    fn title(&self) -> String {
        STUB_TITLE.to_string()
    }

    fn rect(&self) -> Option<Rect> {
        if lock(&self.scene).closed {
            None
        } else {
            Some(Rect::new(0, 0, VIEW_W, VIEW_H))
        }
    }
}

struct StubCapture {
    name: &'static str,
    blank: bool,
    scene: Arc<Mutex<Scene>>,
}

impl CaptureStrategy for StubCapture {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capture(&self, _window: &dyn WindowHandle) -> Result<Frame, CaptureError> {
        let scene = lock(&self.scene);
        if scene.closed {
            return Err(CaptureError::WindowGone);
        }
        if self.blank {
            return Ok(Frame::new(RgbImage::new(VIEW_W, VIEW_H), self.name));
        }
        Ok(Frame::new(scene.render(), self.name))
    }
}

struct StubExecutor {
    scene: Arc<Mutex<Scene>>,
    keys: KeyBindings,
}

impl ActionExecutor for StubExecutor {
    fn perform(&mut self, action: &Action) -> Result<(), ActionError> {
        let mut scene = lock(&self.scene);
        if scene.closed {
            return Err(ActionError::WindowGone);
        }
        logger::info_p("stub", &action.to_string());
        scene.apply(action, &self.keys);
        Ok(())
    }
}

/// Window with a fixed client area and nothing behind it, for unit tests.
pub struct FixedWindow {
    rect: Rect,
}

impl FixedWindow {
    pub fn new(w: u32, h: u32) -> Self {
        Self { rect: Rect::new(0, 0, w, h) }
    }
}

impl WindowHandle for FixedWindow {
    fn id(&self) -> WindowId {
        1
    }

    fn title(&self) -> String {
        "fixed".into()
    }

    fn rect(&self) -> Option<Rect> {
        Some(self.rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_shifts_camera_and_clamps_at_world_edge() {
        let mut scene = Scene::new();
        let keys = KeyBindings::default();
        let (x0, y0) = scene.camera();
        scene.apply(&Action::MoveDirection(Direction::East), &keys);
        assert_eq!(scene.camera(), (x0 + STEP, y0));

        for _ in 0..500 {
            scene.apply(&Action::MoveDirection(Direction::North), &keys);
        }
        let stuck = scene.camera();
        scene.apply(&Action::MoveDirection(Direction::North), &keys);
        assert_eq!(scene.camera(), stuck);
        assert_eq!(stuck.1, 0);
    }

    #[test]
    fn clicking_then_attacking_kills_and_respawns() {
        let mut scene = Scene::new();
        let keys = KeyBindings::default();
        let (cx, cy) = scene.camera;
        scene.enemies[0] = Enemy { x: cx + 100, y: cy + 100, hp: 100 };

        scene.apply(&Action::Click { x: 110, y: 110, button: MouseButton::Left }, &keys);
        assert_eq!(scene.selected, Some(0));
        for _ in 0..3 {
            scene.apply(&Action::PressKey(keys.attack.clone()), &keys);
        }
        assert_eq!(scene.kills, 1);
        assert_eq!(scene.enemies.len(), 3);
        assert!(scene.health < 100);
    }

    #[test]
    fn blocked_strategy_returns_black_and_closed_window_is_gone() {
        let platform = StubPlatform::new();
        let win = platform.window(STUB_WINDOW_ID);
        let strategies = platform.strategies();

        let blank = strategies[0].capture(win.as_ref()).unwrap();
        assert_eq!(blank.mean_luminance(), 0.0);
        let real = strategies[1].capture(win.as_ref()).unwrap();
        assert!(real.mean_luminance() > 30.0);

        platform.scene().lock().unwrap().closed = true;
        assert!(!win.is_alive());
        assert_eq!(strategies[1].capture(win.as_ref()).unwrap_err(), CaptureError::WindowGone);
    }
}
