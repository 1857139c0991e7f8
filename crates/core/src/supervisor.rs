use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::logger;
use crate::pipeline::PipelineHandle;
use crate::platform::{hotkey, Platform};
use crate::settings::Settings;
use crate::types::*;
use crate::vision::CalibrationReport;

const REFRESH_EVERY: Duration = Duration::from_millis(250);

/// What the front end renders. Written only by the supervisor thread.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    pub run_state: RunState,
    pub window_pattern: String,
    pub snapshot: Option<BotSnapshot>,
    /// Latest calibration not yet written to the settings file.
    pub unsaved_calibration: Option<CalibrationReport>,
    pub settings_path: PathBuf,
}

impl StatusBoard {
    pub fn new(settings: &Settings, settings_path: PathBuf) -> Self {
        Self {
            run_state: RunState::Stopped,
            window_pattern: settings.window_pattern.clone(),
            snapshot: None,
            unsaved_calibration: None,
            settings_path,
        }
    }
}

pub fn lock_board(board: &Mutex<StatusBoard>) -> MutexGuard<'_, StatusBoard> {
    board.lock().unwrap_or_else(|e| e.into_inner())
}

struct Supervisor {
    board: Arc<Mutex<StatusBoard>>,
    platform: Arc<dyn Platform>,
    settings: Settings,
    pipeline: Option<PipelineHandle>,
    saved_generation: u32,
}

impl Supervisor {
    fn set_state(&self, state: RunState) {
        lock_board(&self.board).run_state = state;
    }

    fn start(&mut self) {
        if self.pipeline.is_some() {
            return;
        }
        match PipelineHandle::start(Arc::clone(&self.platform), &self.settings) {
            Ok(p) => {
                // a fresh pipeline numbers its calibrations from 1 again
                self.saved_generation = 0;
                self.pipeline = Some(p);
                self.set_state(RunState::Running);
            }
            Err(e) => logger::error(&format!("failed to start pipeline: {:#}", e)),
        }
    }

    fn stop(&mut self) {
        let Some(p) = self.pipeline.take() else { return };
        self.set_state(RunState::Stopping);
        p.stop();
        self.set_state(RunState::Stopped);
    }

    fn save_calibration(&mut self) {
        let (report, path) = {
            let board = lock_board(&self.board);
            (board.unsaved_calibration.clone(), board.settings_path.clone())
        };
        let Some(report) = report else {
            logger::warn("no calibration to save, press c first");
            return;
        };
        self.settings.apply_calibration(&report);
        match self.settings.save(&path) {
            Ok(()) => {
                logger::info(&format!("calibration #{} saved to {}", report.generation, path.display()));
                self.saved_generation = report.generation;
                lock_board(&self.board).unsaved_calibration = None;
            }
            Err(e) => logger::error(&format!("saving calibration: {:#}", e)),
        }
    }

    /// Drain pending commands. Returns false on Quit.
    fn process_commands(&mut self, cmd_rx: &mpsc::Receiver<Command>) -> bool {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Command::Quit => {
                    logger::info("shutting down");
                    self.stop();
                    return false;
                }
                Command::StartStop => {
                    if self.pipeline.is_some() {
                        self.stop();
                    } else {
                        self.start();
                    }
                }
                Command::Calibrate => match &self.pipeline {
                    Some(p) => {
                        logger::info_p("vision", "calibration requested");
                        p.request_calibration();
                    }
                    None => logger::warn("start the bot before calibrating"),
                },
                Command::SaveCalibration => self.save_calibration(),
            }
        }
        true
    }

    fn refresh(&mut self) {
        let Some(snap) = self.pipeline.as_ref().and_then(|p| p.snapshot()) else { return };
        let mut board = lock_board(&self.board);
        if let Some(cal) = snap.calibration.as_ref().filter(|c| c.generation > self.saved_generation) {
            board.unsaved_calibration = Some(cal.clone());
        }
        board.snapshot = Some(snap);
    }
}

/// Main supervision loop. Runs on a background thread until `Command::Quit`
/// or, with `exit_on_hotkey`, the emergency stop chord.
pub fn supervise(
    board: Arc<Mutex<StatusBoard>>,
    platform: Arc<dyn Platform>,
    settings: Settings,
    cmd_rx: mpsc::Receiver<Command>,
    hotkey_flag: Arc<AtomicBool>,
    exit_on_hotkey: bool,
) {
    let mut sup = Supervisor { board, platform, settings, pipeline: None, saved_generation: 0 };
    let mut last_refresh = Instant::now();

    loop {
        if !sup.process_commands(&cmd_rx) {
            return;
        }

        if hotkey::take(&hotkey_flag) {
            logger::warn(&format!("{} pressed, stopping", hotkey::STOP_CHORD));
            sup.stop();
            if exit_on_hotkey {
                return;
            }
        }

        if last_refresh.elapsed() >= REFRESH_EVERY {
            last_refresh = Instant::now();
            sup.refresh();
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
