use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use anyhow::{bail, Context, Result};
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use delver_core::platform::{create_platform, hotkey};
use delver_core::settings::Settings;
use delver_core::supervisor::{self, StatusBoard};
use delver_core::types::Command;
use delver_core::logger;

struct Args {
    stub: bool,
    headless: bool,
    config: PathBuf,
}

fn parse_args() -> Result<Args> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut args = Args { stub: false, headless: false, config: cwd.join("settings.json") };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--stub" => args.stub = true,
            "--headless" => args.headless = true,
            "--config" => args.config = it.next().map(PathBuf::from).context("--config needs a path")?,
            other => bail!("unknown argument '{}' (expected --stub, --headless, --config <path>)", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let logs_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("logs");
    logger::init(&logs_dir).with_context(|| format!("opening log directory {}", logs_dir.display()))?;
    logger::register_pipeline_prefixes();

    let settings = Settings::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let platform = create_platform(args.stub);
    logger::info(&format!("delver started on {} (config {})", platform.name(), args.config.display()));

    let board = Arc::new(Mutex::new(StatusBoard::new(&settings, args.config.clone())));
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

    // Emergency stop chord, also the way out of headless mode
    let hotkey_flag = Arc::new(AtomicBool::new(false));
    hotkey::start_stop_listener(Arc::clone(&hotkey_flag));

    if args.headless {
        println!(
            "running headless, press Enter or {} to stop (log: {})",
            hotkey::STOP_CHORD,
            logs_dir.join("app.log").display()
        );
        cmd_tx.send(Command::StartStop).ok();
        let quit_tx = cmd_tx.clone();
        thread::spawn(move || {
            let mut line = String::new();
            io::stdin().read_line(&mut line).ok();
            quit_tx.send(Command::Quit).ok();
        });
        supervisor::supervise(board, platform, settings, cmd_rx, hotkey_flag, true);
        return Ok(());
    }

    let (log_tx, log_rx) = mpsc::channel::<String>();
    logger::set_tui_sender(log_tx);

    let sup = {
        let board = Arc::clone(&board);
        thread::spawn(move || supervisor::supervise(board, platform, settings, cmd_rx, hotkey_flag, false))
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = delver_tui::App::new(board, log_rx, cmd_tx.clone());
    let result = delver_tui::event::run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    // The TUI may have exited on an error; make sure the pipeline winds down
    cmd_tx.send(Command::Quit).ok();
    if sup.join().is_err() {
        eprintln!("supervisor thread panicked");
    }
    result
}
