//! Runs every capture strategy of the current platform once against the
//! target window and reports which ones deliver usable frames.
//!
//! cargo run -p delver-test --bin capture-probe
//!
//! DELVER_PROBE_NATIVE=1    probe the OS platform instead of the synthetic one
//! DELVER_PROBE_PATTERN=re  window title pattern (default from settings)
//! DELVER_PROBE_DUMP=dir    save each captured frame as <dir>/<strategy>.png

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use libtest_mimic::{Arguments, Failed, Trial};
use regex::Regex;

use delver_core::capture::runner::AttemptRunner;
use delver_core::capture::{CaptureStrategy, CaptureStrategySelector};
use delver_core::platform::{create_platform, discover, Platform, WindowHandle};
use delver_core::settings::Settings;

struct Probe {
    platform: Arc<dyn Platform>,
    window: Arc<dyn WindowHandle>,
    settings: Settings,
    dump: Option<PathBuf>,
}

fn setup() -> Result<Probe, String> {
    let settings = Settings::default();
    let native = env::var_os("DELVER_PROBE_NATIVE").is_some();
    let platform = create_platform(!native);
    let pattern = env::var("DELVER_PROBE_PATTERN").unwrap_or_else(|_| settings.window_pattern.clone());
    let re = Regex::new(&format!("(?i){}", pattern)).map_err(|e| format!("bad pattern: {}", e))?;
    let window = discover(platform.as_ref(), &re)
        .ok_or_else(|| format!("no window matching /{}/ on {}", pattern, platform.name()))?;
    let dump = env::var_os("DELVER_PROBE_DUMP").map(PathBuf::from);
    Ok(Probe { platform, window, settings, dump })
}

/// One attempt of `strategy`, bounded like the live pipeline bounds it.
fn probe_strategy(probe: &Probe, strategy: Arc<dyn CaptureStrategy>) -> Result<(), Failed> {
    let mut runner = AttemptRunner::new(probe.settings.capture.attempt_timeout());
    let t = Instant::now();
    let result = runner.run(&strategy, &probe.window);
    let elapsed = t.elapsed();
    runner.shutdown();

    let frame = result.map_err(|e| Failed::from(format!("{} after {:?}", e, elapsed)))?;
    let luma = frame.mean_luminance();
    println!(
        "  {:<20} {}x{} luma {:>6.1} in {:?}",
        strategy.name(),
        frame.width(),
        frame.height(),
        luma,
        elapsed
    );
    if let Some(dir) = &probe.dump {
        let path = dir.join(format!("{}.png", strategy.name()));
        frame.save_png(&path).map_err(|e| Failed::from(format!("{:#}", e)))?;
        println!("  saved {}", path.display());
    }
    // blank frames are reported here and skipped by the selector
    if luma < probe.settings.capture.luminance_floor {
        println!("  {} is blanked (floor {:.1})", strategy.name(), probe.settings.capture.luminance_floor);
    }
    Ok(())
}

/// The selector must settle on a strategy that yields non-degraded frames.
fn probe_selector(probe: &Probe) -> Result<(), Failed> {
    let mut selector = CaptureStrategySelector::new(probe.platform.strategies(), &probe.settings.capture);
    let mut degraded = 0;
    for _ in 0..5 {
        let outcome = selector.capture(&probe.window).map_err(|e| Failed::from(e.to_string()))?;
        if outcome.degraded {
            degraded += 1;
        }
    }
    for report in selector.reports() {
        println!("  {}", report);
    }
    let sticky = selector.sticky_name();
    selector.shutdown();
    match sticky {
        Some(name) if degraded == 0 => {
            println!("  sticky strategy: {}", name);
            Ok(())
        }
        Some(name) => Err(format!("{} of 5 frames degraded (sticky {})", degraded, name).into()),
        None => Err("no strategy became sticky".into()),
    }
}

fn main() {
    let args = Arguments::from_args();
    let probe = match setup() {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("capture-probe: {}", e);
            std::process::exit(2);
        }
    };
    if let Some(dir) = &probe.dump {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("capture-probe: {}: {}", dir.display(), e);
            std::process::exit(2);
        }
    }
    println!("{}: probing \"{}\"", probe.platform.name(), probe.window.title());

    let mut tests: Vec<Trial> = probe
        .platform
        .strategies()
        .into_iter()
        .map(|strategy| {
            let p = Arc::clone(&probe);
            Trial::test(format!("strategy_{}", strategy.name()), move || probe_strategy(&p, strategy))
        })
        .collect();
    let p = Arc::clone(&probe);
    tests.push(Trial::test("selector_settles", move || probe_selector(&p)));

    libtest_mimic::run(&args, tests).exit();
}
