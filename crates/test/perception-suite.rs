//! Scripted scenarios on the synthetic arena: classification, vitals,
//! anti-stuck and a closed perception → decision → action loop.
//!
//! cargo run -p delver-test --bin perception-suite [-- <filter>]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use libtest_mimic::{Arguments, Failed, Trial};
use regex::Regex;

use delver_core::bot::{AntiStuck, Decision, DecisionLoop, StuckPhase};
use delver_core::capture::{CaptureOutcome, Frame};
use delver_core::platform::stub::{Scene, StubPlatform, HEALTH_BAR, MANA_BAR, VIEW_H, VIEW_W};
use delver_core::platform::Platform;
use delver_core::settings::Settings;
use delver_core::types::*;
use delver_core::vision::{Perception, PerceptionClassifier};

fn check(cond: bool, msg: impl Into<String>) -> Result<(), Failed> {
    if cond {
        return Ok(());
    }
    let msg: String = msg.into();
    Err(msg.into())
}

fn lock(scene: &Mutex<Scene>) -> MutexGuard<'_, Scene> {
    scene.lock().unwrap_or_else(|e| e.into_inner())
}

fn perception(settings: &Settings) -> Perception {
    Perception::new(&settings.perception, &settings.vitals, &settings.position)
}

fn outcome(image: RgbImage, at: Instant) -> CaptureOutcome {
    CaptureOutcome { frame: Frame::at(image, "stub_render", at), degraded: false, luminance: 60.0 }
}

fn paint(img: &mut RgbImage, rect: Rect, color: [u8; 3]) {
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            img.put_pixel(x as u32, y as u32, Rgb(color));
        }
    }
}

fn arena_classification() -> Result<(), Failed> {
    let mut img = RgbImage::from_pixel(VIEW_W, VIEW_H, Rgb([35, 35, 38]));
    paint(&mut img, Rect::new(400, 200, 40, 40), [210, 25, 25]); // mob
    paint(&mut img, Rect::new(100, 250, 20, 20), [200, 30, 30]); // smaller mob
    paint(&mut img, Rect::new(300, 150, 50, 40), [230, 170, 30]); // stairs near center
    paint(&mut img, Rect::new(520, 60, 40, 40), [150, 40, 210]); // portal
    paint(&mut img, Rect::new(0, 300, 640, 60), [110, 110, 112]); // wall
    paint(&mut img, Rect::new(200, 80, 16, 16), [30, 240, 40]); // player tag

    let classifier = PerceptionClassifier::new(&Settings::default().perception);
    let lists = classifier.classify(&Frame::new(img, "synthetic"), None);
    check(lists.enemies.len() == 2, format!("enemies: {:?}", lists.enemies))?;
    check(lists.enemies[0].bbox == Rect::new(400, 200, 40, 40), "largest mob first")?;
    check(lists.stairs.len() == 1, format!("stairs: {:?}", lists.stairs))?;
    check(lists.portals.len() == 1, format!("portals: {:?}", lists.portals))?;
    check(lists.obstacles.len() == 1, format!("obstacles: {:?}", lists.obstacles))?;
    check(lists.players.len() == 1, format!("players: {:?}", lists.players))
}

fn stub_calibration_and_vitals() -> Result<(), Failed> {
    let scene = Scene::new();
    let mut p = perception(&Settings::default());

    let uncalibrated = p.observe(&outcome(scene.render(), Instant::now()));
    check(!uncalibrated.health_measured && uncalibrated.health_pct == 100, "uncalibrated vitals are defaults")?;

    let found = p.vitals.calibrate(&Frame::new(scene.render(), "stub_render"));
    let report = p.vitals.apply(&found);
    check(report.health.map(|r| r.rect) == Some(HEALTH_BAR), format!("health region: {}", report))?;
    check(report.mana.map(|r| r.rect) == Some(MANA_BAR), format!("mana region: {}", report))?;

    let obs = p.observe(&outcome(scene.render(), Instant::now()));
    check(obs.health_measured && obs.mana_measured, "calibrated bars are measured")?;
    check(obs.enemies.len() == 1, format!("visible enemies: {:?}", obs.enemies))
}

fn stuck_wall_escalates() -> Result<(), Failed> {
    let mut stuck = AntiStuck::new(Direction::North, 3);
    let phases: Vec<StuckPhase> = (0..3).map(|_| stuck.on_tick(false).phase).collect();
    check(
        phases == [StuckPhase::Retrying, StuckPhase::Retrying, StuckPhase::Escalating],
        format!("phases: {:?}", phases),
    )?;
    check(stuck.state().last_emitted == Direction::South, "reversed heading")?;
    let d = stuck.on_tick(true);
    check(d.direction == Direction::South && d.phase == StuckPhase::Cruising, "progress keeps the escape heading")
}

struct Run {
    scene: Arc<Mutex<Scene>>,
    decisions: Vec<Decision>,
    start_camera: (i32, i32),
}

/// Closed loop on simulated time: each tick the stub scene is rendered,
/// perceived, decided on and acted upon.
fn closed_loop(ticks: u32, setup: impl FnOnce(&mut Scene)) -> Result<Run, Failed> {
    let platform = StubPlatform::new();
    let scene = platform.scene();
    let settings = Settings::default();
    let pattern = Regex::new(".*").map_err(|e| Failed::from(e.to_string()))?;
    let (id, _) = platform.find_windows(&pattern).into_iter().next().ok_or("no stub window")?;
    let mut exec = platform.executor(platform.window(id), &settings.bot.keys);
    let mut bot = DecisionLoop::from_config(settings.bot.clone());

    let mut p = perception(&settings);
    let found = p.vitals.calibrate(&Frame::new(lock(&scene).render(), "stub_render"));
    p.vitals.apply(&found);

    // calibrated on the pristine arena, then staged
    setup(&mut lock(&scene));
    let start_camera = lock(&scene).camera();

    let t0 = Instant::now();
    let mut decisions = Vec::new();
    for i in 0..ticks {
        let now = t0 + Duration::from_millis(100 * i as u64);
        let image = lock(&scene).render();
        let obs = p.observe(&outcome(image, now));
        if let Some(d) = bot.tick(Some(&obs), now) {
            exec.perform(&d.action).map_err(|e| Failed::from(e.to_string()))?;
            bot.commit(&d, now);
            decisions.push(d);
        }
    }
    Ok(Run { scene, decisions, start_camera })
}

fn loop_kills_the_visible_mob() -> Result<(), Failed> {
    let run = closed_loop(100, |_| {})?;
    check(
        matches!(run.decisions.first().map(|d| &d.action), Some(Action::Click { .. })),
        "engagement starts with a click",
    )?;
    let kills = lock(&run.scene).kills;
    check(kills >= 1, format!("no kill in 10s of simulated time ({} decisions)", run.decisions.len()))
}

fn loop_heals_when_low() -> Result<(), Failed> {
    // 4% reads as the lowest band; anything above 10% reads full
    let run = closed_loop(5, |s| s.set_vitals(4, 100))?;
    let first = run.decisions.first().ok_or("no decision")?;
    check(first.category == ActionCategory::Heal, format!("first decision: {:?}", first))?;
    let hp = lock(&run.scene).vitals().0;
    check(hp == 44, "heal landed once")
}

fn loop_wanders_when_arena_is_empty() -> Result<(), Failed> {
    let run = closed_loop(60, |s| s.clear_enemies())?;
    check(run.decisions.len() == 4, format!("{} decisions in 6s", run.decisions.len()))?;
    check(
        run.decisions.iter().all(|d| d.category == ActionCategory::Movement),
        "only movement in an empty arena",
    )?;
    let camera = lock(&run.scene).camera();
    check(camera != run.start_camera, "camera moved")
}

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        Trial::test("classify_synthetic_arena", arena_classification),
        Trial::test("stub_calibration_and_vitals", stub_calibration_and_vitals),
        Trial::test("stuck_wall_escalates", stuck_wall_escalates),
        Trial::test("closed_loop_kills_visible_mob", loop_kills_the_visible_mob),
        Trial::test("closed_loop_heals_when_low", loop_heals_when_low),
        Trial::test("closed_loop_wanders_when_empty", loop_wanders_when_arena_is_empty),
    ];
    libtest_mimic::run(&args, tests).exit();
}
