//! Thread wiring for capture → perception → decision.
//!
//! The capture thread owns the selector and perception state and sends each
//! observation to the decision thread, which owns `DecisionLoop` and the
//! executor. All bot state changes happen on the decision thread; everyone
//! else sends a [`BotCommand`]. A single stop flag ends every thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Local;
use regex::RegexBuilder;

use crate::bot::{DecisionLoop, MapLogSettings, StuckPhase, VisitedLog};
use crate::capture::{CaptureOutcome, CaptureStrategySelector, StrategyReport};
use crate::error::{ActionError, CaptureError};
use crate::logger;
use crate::platform::{self, ActionExecutor, Platform, WindowHandle};
use crate::settings::Settings;
use crate::types::{BotSnapshot, Observation};
use crate::vision::{CalibrationReport, Perception};

/// How often strategy reports are forwarded to the status view.
const REPORT_EVERY: Duration = Duration::from_secs(1);
/// Window rediscovery poll.
const DISCOVERY_EVERY: Duration = Duration::from_secs(1);
/// Position sampling for the visited-cell log.
const MAP_SAMPLE_EVERY: Duration = Duration::from_millis(500);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause after a failed capture round.
const CAPTURE_BACKOFF: Duration = Duration::from_millis(250);

/// Messages into the decision thread.
pub enum BotCommand {
    Observe(Observation),
    Stats(Vec<StrategyReport>),
    Calibrated(CalibrationReport),
    /// New target window, or `None` once it is gone.
    Window(Option<Arc<dyn WindowHandle>>),
    Snapshot(mpsc::Sender<BotSnapshot>),
}

/// A running pipeline. Dropping it without `stop` leaves the threads running
/// until the process exits.
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    calibrate: Arc<AtomicBool>,
    bot_tx: mpsc::Sender<BotCommand>,
    threads: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn start(platform: Arc<dyn Platform>, settings: &Settings) -> anyhow::Result<Self> {
        let pattern = RegexBuilder::new(&settings.window_pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("bad window pattern '{}'", settings.window_pattern))?;

        let stop = Arc::new(AtomicBool::new(false));
        let calibrate = Arc::new(AtomicBool::new(false));
        let (bot_tx, bot_rx) = mpsc::channel();
        let mut threads = Vec::new();

        let capture = CaptureTask {
            platform: Arc::clone(&platform),
            pattern,
            selector: CaptureStrategySelector::new(platform.strategies(), &settings.capture),
            perception: Perception::new(&settings.perception, &settings.vitals, &settings.position),
            stats_every: settings.capture.stats_interval(),
            stop: Arc::clone(&stop),
            calibrate: Arc::clone(&calibrate),
            tx: bot_tx.clone(),
        };
        threads.push(spawn("capture", move || capture.run())?);

        let decision = DecisionTask {
            platform,
            bot: DecisionLoop::from_config(settings.bot.clone()),
            stop: Arc::clone(&stop),
            rx: bot_rx,
        };
        threads.push(spawn("decision", move || decision.run())?);

        if let Some(path) = settings.map_log.path.clone() {
            let cfg = settings.map_log.clone();
            let stop = Arc::clone(&stop);
            let tx = bot_tx.clone();
            logger::info_p("pipeline", &format!("visited-cell log: {}", path.display()));
            threads.push(spawn("map-log", move || map_log_task(cfg, stop, tx))?);
        }

        logger::info_p("pipeline", "started");
        Ok(Self { stop, calibrate, bot_tx, threads })
    }

    /// Current bot view, or `None` if the decision thread is busy or gone.
    pub fn snapshot(&self) -> Option<BotSnapshot> {
        let (tx, rx) = mpsc::channel();
        self.bot_tx.send(BotCommand::Snapshot(tx)).ok()?;
        rx.recv_timeout(SNAPSHOT_TIMEOUT).ok()
    }

    /// Calibrate on the next usable frame.
    pub fn request_calibration(&self) {
        self.calibrate.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Raise the stop flag and wait for every thread. No action is issued
    /// once this has been called.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.bot_tx);
        for t in self.threads {
            if t.join().is_err() {
                logger::error_p("pipeline", "a pipeline thread panicked");
            }
        }
        logger::info_p("pipeline", "stopped");
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> anyhow::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("delver-{}", name))
        .spawn(f)
        .with_context(|| format!("spawning {} thread", name))
}

/// Sleep up to `d`, waking early on stop. Returns whether stop was raised.
fn nap(stop: &AtomicBool, d: Duration) -> bool {
    let deadline = Instant::now() + d;
    while !stop.load(Ordering::SeqCst) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return false;
        }
        thread::sleep(left.min(Duration::from_millis(50)));
    }
    true
}

struct CaptureTask {
    platform: Arc<dyn Platform>,
    pattern: regex::Regex,
    selector: CaptureStrategySelector,
    perception: Perception,
    stats_every: Duration,
    stop: Arc<AtomicBool>,
    calibrate: Arc<AtomicBool>,
    tx: mpsc::Sender<BotCommand>,
}

impl CaptureTask {
    fn run(mut self) {
        let mut window: Option<Arc<dyn WindowHandle>> = None;
        let mut was_degraded = false;
        let mut last_error: Option<CaptureError> = None;
        let mut last_report = Instant::now();
        let mut last_stats = Instant::now();

        while !self.stop.load(Ordering::SeqCst) {
            let Some(win) = window.clone() else {
                match platform::discover(self.platform.as_ref(), &self.pattern) {
                    Some(found) => {
                        logger::info_p("capture", &format!("capturing \"{}\"", found.title()));
                        self.selector.reset_sticky();
                        self.perception.motion.reset();
                        window = Some(Arc::clone(&found));
                        if self.tx.send(BotCommand::Window(Some(found))).is_err() {
                            break;
                        }
                    }
                    None => {
                        if nap(&self.stop, DISCOVERY_EVERY) {
                            break;
                        }
                    }
                }
                continue;
            };

            match self.selector.capture(&win) {
                Ok(outcome) => {
                    last_error = None;
                    if outcome.degraded != was_degraded {
                        if outcome.degraded {
                            logger::warn_p(
                                "capture",
                                &format!("frames are blank (luma {:.1}), treating as degraded", outcome.luminance),
                            );
                        } else {
                            logger::info_p("capture", "frames are readable again");
                        }
                        was_degraded = outcome.degraded;
                    }
                    #[cfg(feature = "debug-capture")]
                    if outcome.degraded {
                        dump_frame(&outcome);
                    }
                    if !outcome.degraded && self.calibrate.swap(false, Ordering::SeqCst) {
                        self.run_calibration(&outcome);
                    }
                    let obs = self.perception.observe(&outcome);
                    if self.tx.send(BotCommand::Observe(obs)).is_err() {
                        break;
                    }
                }
                Err(CaptureError::WindowGone) => {
                    logger::warn_p("capture", "target window is gone, rediscovering");
                    window = None;
                    if self.tx.send(BotCommand::Window(None)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    if last_error.as_ref() != Some(&err) {
                        logger::warn_p("capture", &err.to_string());
                        last_error = Some(err);
                    }
                    if nap(&self.stop, CAPTURE_BACKOFF) {
                        break;
                    }
                }
            }

            if last_report.elapsed() >= REPORT_EVERY {
                last_report = Instant::now();
                let reports = self.selector.reports();
                if last_stats.elapsed() >= self.stats_every {
                    last_stats = Instant::now();
                    for r in &reports {
                        logger::info_p("capture", &r.to_string());
                    }
                }
                if self.tx.send(BotCommand::Stats(reports)).is_err() {
                    break;
                }
            }
        }
        self.selector.shutdown();
    }

    fn run_calibration(&mut self, outcome: &CaptureOutcome) {
        let found = self.perception.vitals.calibrate(&outcome.frame);
        let applied = self.perception.vitals.apply(&found);
        if !found.is_complete() {
            logger::warn_p("vision", "calibration incomplete, missing bars keep their previous region");
        }
        logger::info_p("vision", &format!("calibration #{} applied: {}", applied.generation, applied));
        self.tx.send(BotCommand::Calibrated(applied)).ok();
    }
}

#[cfg(feature = "debug-capture")]
fn dump_frame(outcome: &CaptureOutcome) {
    let name = format!("{}-{}.png", outcome.frame.strategy(), Local::now().format("%H%M%S%3f"));
    let path = std::path::Path::new("logs").join("frames").join(name);
    if let Err(e) = outcome.frame.save_png(&path) {
        logger::warn_p("capture", &format!("frame dump failed: {:#}", e));
    }
}

struct DecisionTask {
    platform: Arc<dyn Platform>,
    bot: DecisionLoop,
    stop: Arc<AtomicBool>,
    rx: mpsc::Receiver<BotCommand>,
}

impl DecisionTask {
    fn run(mut self) {
        let tick = self.bot.config().tick();
        let mut executor: Option<Box<dyn ActionExecutor>> = None;
        let mut window_title: Option<String> = None;
        let mut latest: Option<Observation> = None;
        let mut strategies: Vec<StrategyReport> = Vec::new();
        let mut calibration: Option<CalibrationReport> = None;
        let mut next_tick = Instant::now();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let wait = next_tick.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(wait) {
                Ok(BotCommand::Observe(obs)) => latest = Some(obs),
                Ok(BotCommand::Stats(reports)) => strategies = reports,
                Ok(BotCommand::Calibrated(report)) => calibration = Some(report),
                Ok(BotCommand::Window(Some(win))) => {
                    window_title = Some(win.title());
                    executor = Some(self.platform.executor(win, &self.bot.config().keys));
                }
                Ok(BotCommand::Window(None)) => {
                    window_title = None;
                    executor = None;
                    latest = None;
                }
                Ok(BotCommand::Snapshot(reply)) => {
                    let mut snap = self.bot.snapshot(Instant::now());
                    snap.window_title = window_title.clone();
                    snap.strategies = strategies.clone();
                    snap.calibration = calibration.clone();
                    reply.send(snap).ok();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if now < next_tick {
                continue;
            }
            next_tick = (next_tick + tick).max(now);
            self.step(&mut executor, latest.as_ref(), now);
        }
    }

    fn step(&mut self, executor: &mut Option<Box<dyn ActionExecutor>>, latest: Option<&Observation>, now: Instant) {
        let kills = self.bot.state().kills;
        let decision = self.bot.tick(latest, now);
        if self.bot.state().kills != kills {
            logger::info_p("bot", &format!("kill confirmed ({} total)", self.bot.state().kills));
        }
        let (Some(decision), Some(exec)) = (decision, executor.as_mut()) else { return };
        if self.stop.load(Ordering::SeqCst) {
            return;
        }

        match exec.perform(&decision.action) {
            Ok(()) => {
                logger::info_p("bot", &format!("{}: {}", decision.category.name(), decision.action));
                if let Some((directive, next)) = decision.movement {
                    if directive.phase == StuckPhase::Escalating {
                        logger::warn_p("stuck", &format!("no progress, reversing to {}", directive.direction.name()));
                    } else if directive.phase == StuckPhase::Retrying {
                        logger::info_p(
                            "stuck",
                            &format!("no progress ({}), trying {}", next.attempts_without_progress, directive.direction.name()),
                        );
                    }
                }
                self.bot.commit(&decision, now);
            }
            Err(ActionError::WindowGone) => {
                logger::warn_p("bot", "window gone while acting, waiting for rediscovery");
                *executor = None;
            }
            Err(e) => logger::warn_p("bot", &format!("{} failed: {}, retrying next tick", decision.action, e)),
        }
    }
}

fn map_log_task(cfg: MapLogSettings, stop: Arc<AtomicBool>, tx: mpsc::Sender<BotCommand>) {
    let Some(path) = cfg.path.clone() else { return };
    let mut log = if cfg.resume && path.exists() {
        match VisitedLog::load(&path) {
            Ok(log) => {
                logger::info_p("pipeline", &format!("resuming visited-cell log ({} cells)", log.len()));
                log
            }
            Err(e) => {
                logger::warn_p("pipeline", &format!("could not resume visited-cell log: {:#}", e));
                VisitedLog::new(cfg.cell_size)
            }
        }
    } else {
        VisitedLog::new(cfg.cell_size)
    };

    let interval = Duration::from_millis(cfg.interval_ms.max(1));
    let mut last_write = Instant::now();
    loop {
        let stopped = nap(&stop, MAP_SAMPLE_EVERY);
        let (reply_tx, reply_rx) = mpsc::channel();
        if !stopped && tx.send(BotCommand::Snapshot(reply_tx)).is_ok() {
            if let Ok(Some((x, y))) = reply_rx.recv_timeout(SNAPSHOT_TIMEOUT).map(|s| s.position) {
                log.record(x, y, Local::now());
            }
        }
        if stopped || last_write.elapsed() >= interval {
            last_write = Instant::now();
            if let Err(e) = log.save(&path) {
                logger::warn_p("pipeline", &format!("visited-cell log write failed: {:#}", e));
            }
        }
        if stopped {
            break;
        }
    }
}
