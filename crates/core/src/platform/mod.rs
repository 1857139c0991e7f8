pub mod stub;
pub mod hotkey;

#[cfg(target_os = "windows")]
pub mod win32;

#[cfg(target_os = "macos")]
pub mod darwin;

use std::sync::Arc;

use regex::Regex;

use crate::capture::CaptureStrategy;
use crate::error::ActionError;
use crate::logger;
use crate::types::*;

/// Handle to the target application's top-level window.
///
/// Owns no pixels. A stale handle answers `None` / `false`, never panics.
pub trait WindowHandle: Send + Sync {
    fn id(&self) -> WindowId;
    fn title(&self) -> String;
    /// Client area in screen coordinates; `None` once the window is gone.
    fn rect(&self) -> Option<Rect>;
    fn is_alive(&self) -> bool {
        self.rect().is_some()
    }
    /// Bring the window to the foreground, best effort.
    fn activate(&self) {}
}

/// Delivers one `Action` to the target window.
pub trait ActionExecutor: Send {
    fn perform(&mut self, action: &Action) -> Result<(), ActionError>;
}

/// Platform-level operations (window discovery, capture strategies, input).
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;
    fn find_windows(&self, pattern: &Regex) -> Vec<(WindowId, String)>;
    fn window(&self, id: WindowId) -> Arc<dyn WindowHandle>;
    /// Capture strategies in default priority order.
    fn strategies(&self) -> Vec<Arc<dyn CaptureStrategy>>;
    fn executor(&self, window: Arc<dyn WindowHandle>, keys: &KeyBindings) -> Box<dyn ActionExecutor>;
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Arc<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Arc::new(stub::StubPlatform::new());
    }
    #[cfg(target_os = "windows")]
    {
        logger::register_prefix("gdi", logger::COLOR_GRAY);
        return Arc::new(win32::Win32Platform);
    }
    #[cfg(target_os = "macos")]
    {
        logger::register_prefix("darwin", logger::COLOR_GRAY);
        return Arc::new(darwin::DarwinPlatform);
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        logger::warn("no native capture on this OS, using the synthetic platform");
        return Arc::new(stub::StubPlatform::new());
    }
}

/// First window whose title matches `pattern`, if any. Callers poll.
pub fn discover(platform: &dyn Platform, pattern: &Regex) -> Option<Arc<dyn WindowHandle>> {
    let (id, title) = platform.find_windows(pattern).into_iter().next()?;
    logger::info(&format!("[{}] using window \"{}\" (id: {})", platform.name(), title, id));
    Some(platform.window(id))
}
