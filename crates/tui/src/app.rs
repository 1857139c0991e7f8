use std::sync::{mpsc, Arc, Mutex};

use delver_core::supervisor::{lock_board, StatusBoard};
use delver_core::types::{Command, RunState};

use crate::confirm::ConfirmDialog;

/// Log lines kept for the scrollback.
const LOG_CAPACITY: usize = 2000;

pub struct App {
    pub board: Arc<Mutex<StatusBoard>>,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        board: Arc<Mutex<StatusBoard>>,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            board,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
            // keep the view anchored when scrolled back
            if self.log_scroll > 0 {
                self.log_scroll += 1;
            }
        }
        if self.log_messages.len() > LOG_CAPACITY {
            let excess = self.log_messages.len() - LOG_CAPACITY;
            self.log_messages.drain(..excess);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn run_state(&self) -> RunState {
        lock_board(&self.board).run_state
    }

    pub fn start_stop(&mut self) {
        self.cmd_tx.send(Command::StartStop).ok();
    }

    pub fn calibrate(&mut self) {
        self.cmd_tx.send(Command::Calibrate).ok();
    }

    pub fn save_calibration(&mut self) {
        self.cmd_tx.send(Command::SaveCalibration).ok();
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Quit right away when idle; ask first while the bot is running.
    pub fn request_quit(&mut self) {
        if self.run_state() == RunState::Stopped {
            self.quit();
        } else {
            self.confirm = Some(ConfirmDialog::new("Bot is running. Stop and quit?"));
        }
    }

    /// Resolve the open dialog; `true` confirms.
    pub fn answer_confirm(&mut self, yes: bool) {
        if self.confirm.take().is_some() && yes {
            self.quit();
        }
    }

    pub fn quit(&mut self) {
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delver_core::settings::Settings;
    use std::path::PathBuf;

    fn app() -> (App, mpsc::Sender<String>, mpsc::Receiver<Command>) {
        let board = StatusBoard::new(&Settings::default(), PathBuf::from("settings.json"));
        let (log_tx, log_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        (App::new(Arc::new(Mutex::new(board)), log_rx, cmd_tx), log_tx, cmd_rx)
    }

    #[test]
    fn scrollback_is_bounded_and_stays_anchored() {
        let (mut app, log_tx, _cmd) = app();
        for i in 0..LOG_CAPACITY + 10 {
            log_tx.send(format!("line {}", i)).unwrap();
        }
        app.drain_logs();
        assert_eq!(app.log_messages.len(), LOG_CAPACITY);
        assert_eq!(app.log_messages[0], "line 10");

        app.scroll_log_up(5);
        log_tx.send("new".into()).unwrap();
        app.drain_logs();
        assert_eq!(app.log_scroll, 6);
    }

    #[test]
    fn quitting_while_running_asks_first() {
        let (mut app, _log, cmd_rx) = app();
        lock_board(&app.board).run_state = RunState::Running;
        app.request_quit();
        assert!(app.confirm.is_some() && !app.should_quit);
        app.answer_confirm(false);
        assert!(app.confirm.is_none() && !app.should_quit);

        app.request_quit();
        app.answer_confirm(true);
        assert!(app.should_quit);
        assert!(matches!(cmd_rx.try_recv(), Ok(Command::Quit)));
    }
}
