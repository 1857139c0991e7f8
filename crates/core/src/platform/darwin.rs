use std::process::Command as ProcessCommand;
use std::sync::Arc;
use std::time::Duration;

use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::*;
use core_graphics::window::*;
use regex::Regex;

use crate::capture::{CaptureStrategy, Frame};
use crate::error::{ActionError, CaptureError};
use crate::logger;
use crate::sleep;
use crate::types::*;
use super::{ActionExecutor, Platform, WindowHandle};

// AppleScript key codes for special keys
fn applescript_key_code(key: &str) -> Option<u16> {
    match key {
        "enter" | "return" => Some(36),
        "escape" | "esc" => Some(53),
        "tab" => Some(48),
        "space" => Some(49),
        "up" => Some(126),
        "down" => Some(125),
        "left" => Some(123),
        "right" => Some(124),
        "f1" => Some(122),
        "f2" => Some(120),
        "f3" => Some(99),
        "f4" => Some(118),
        "f5" => Some(96),
        "f6" => Some(97),
        _ => None,
    }
}

/// Virtual key codes for keys that get held (movement). ANSI layout.
fn virtual_key_code(key: &str) -> Option<CGKeyCode> {
    let code = match key {
        "a" => 0,
        "s" => 1,
        "d" => 2,
        "q" => 12,
        "w" => 13,
        "e" => 14,
        "up" => 126,
        "down" => 125,
        "left" => 123,
        "right" => 124,
        _ => return None,
    };
    Some(code)
}

pub struct DarwinPlatform;

/// One entry of the on-screen window list.
struct WindowInfo {
    id: WindowId,
    title: String,
    name: String,
    owner: String,
    pid: Option<i32>,
    layer: Option<i64>,
    bounds: Option<Rect>,
}

fn window_list() -> Vec<WindowInfo> {
    let mut windows = Vec::new();
    unsafe {
        let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
        let window_list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
        if window_list_ref.is_null() {
            logger::warn_p("darwin", "failed to get window list");
            return windows;
        }

        let list: CFArray = CFArray::wrap_under_create_rule(window_list_ref as _);
        for dict_ptr in &list.get_all_values() {
            let dict: CFDictionary<CFString, *const std::ffi::c_void> =
                CFDictionary::wrap_under_get_rule(*dict_ptr as _);

            let Some(id) = get_cf_number(&dict, "kCGWindowNumber") else { continue };
            let name = get_cf_string(&dict, "kCGWindowName").unwrap_or_default();
            let owner = get_cf_string(&dict, "kCGWindowOwnerName").unwrap_or_default();
            let title = if !name.is_empty() { name.clone() } else { owner.clone() };

            let bounds = get_cf_dict(&dict, "kCGWindowBounds").map(|b| {
                Rect::new(
                    get_cf_number(&b, "X").unwrap_or(0) as i32,
                    get_cf_number(&b, "Y").unwrap_or(0) as i32,
                    get_cf_number(&b, "Width").unwrap_or(0).max(0) as u32,
                    get_cf_number(&b, "Height").unwrap_or(0).max(0) as u32,
                )
            });

            windows.push(WindowInfo {
                id: id as WindowId,
                title,
                name,
                owner,
                pid: get_cf_number(&dict, "kCGWindowOwnerPID").map(|v| v as i32),
                layer: get_cf_number(&dict, "kCGWindowLayer"),
                bounds,
            });
        }
    }
    windows
}

fn lookup(id: WindowId) -> Option<WindowInfo> {
    window_list().into_iter().find(|w| w.id == id)
}

impl Platform for DarwinPlatform {
    fn name(&self) -> &'static str {
        "darwin"
    }

    fn find_windows(&self, pattern: &Regex) -> Vec<(WindowId, String)> {
        window_list()
            .into_iter()
            .filter(|w| w.layer == Some(0) && !w.title.is_empty())
            // Match against title, name, and owner individually
            .filter(|w| pattern.is_match(&w.title) || pattern.is_match(&w.name) || pattern.is_match(&w.owner))
            .map(|w| {
                logger::info_p("darwin", &format!("found window: \"{}\" (id: {})", w.title, w.id));
                (w.id, w.title)
            })
            .collect()
    }

    fn window(&self, id: WindowId) -> Arc<dyn WindowHandle> {
        Arc::new(DarwinWindow { window_id: id as CGWindowID })
    }

    fn strategies(&self) -> Vec<Arc<dyn CaptureStrategy>> {
        vec![Arc::new(WindowListImage), Arc::new(ScreenRegionImage)]
    }

    fn executor(&self, window: Arc<dyn WindowHandle>, keys: &KeyBindings) -> Box<dyn ActionExecutor> {
        Box::new(DarwinExecutor { window, hold: Duration::from_millis(keys.movement.hold_ms), keys: keys.movement.clone() })
    }
}

struct DarwinWindow {
    window_id: CGWindowID,
}

impl DarwinWindow {
    fn pid(&self) -> Option<i32> {
        lookup(self.window_id as WindowId).and_then(|w| w.pid)
    }
}

impl WindowHandle for DarwinWindow {
    fn id(&self) -> WindowId {
        self.window_id as WindowId
    }

    fn title(&self) -> String {
        lookup(self.window_id as WindowId).map(|w| w.title).unwrap_or_default()
    }

    fn rect(&self) -> Option<Rect> {
        lookup(self.window_id as WindowId)?.bounds.filter(|r| !r.is_empty())
    }

    fn activate(&self) {
        let Some(pid) = self.pid() else { return };
        let script = format!(
            "tell application \"System Events\" to set frontmost of first process whose unix id is {} to true",
            pid
        );
        run_osascript(&script);
    }
}

fn to_cg_rect(r: Rect) -> CGRect {
    CGRect::new(&CGPoint::new(r.x as f64, r.y as f64), &CGSize::new(r.w as f64, r.h as f64))
}

fn image_to_frame(image: &core_graphics::image::CGImage, strategy: &'static str) -> Result<Frame, CaptureError> {
    let bpr = image.bytes_per_row();
    let width = image.width() as u32;
    let height = image.height() as u32;
    let cf_data = image.data();
    Frame::from_bgra(cf_data.bytes(), width, height, bpr, false, strategy)
        .ok_or_else(|| CaptureError::os(strategy, format!("unexpected image layout {}x{} bpr {}", width, height, bpr)))
}

/// Composited image of just the target window, even when covered.
struct WindowListImage;

impl CaptureStrategy for WindowListImage {
    fn name(&self) -> &'static str {
        "window_list_image"
    }

    fn capture(&self, window: &dyn WindowHandle) -> Result<Frame, CaptureError> {
        let rect = window.rect().ok_or(CaptureError::WindowGone)?;
        let image = create_image(
            to_cg_rect(rect),
            kCGWindowListOptionIncludingWindow,
            window.id() as CGWindowID,
            kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution,
        )
        .ok_or_else(|| CaptureError::os(self.name(), "CGWindowListCreateImage returned null"))?;
        image_to_frame(&image, self.name())
    }
}

/// Whatever is on screen inside the window's bounds.
struct ScreenRegionImage;

impl CaptureStrategy for ScreenRegionImage {
    fn name(&self) -> &'static str {
        "screen_region_image"
    }

    fn capture(&self, window: &dyn WindowHandle) -> Result<Frame, CaptureError> {
        let rect = window.rect().ok_or(CaptureError::WindowGone)?;
        let image = create_image(
            to_cg_rect(rect),
            kCGWindowListOptionOnScreenOnly,
            kCGNullWindowID,
            kCGWindowImageNominalResolution,
        )
        .ok_or_else(|| CaptureError::os(self.name(), "screen image returned null"))?;
        image_to_frame(&image, self.name())
    }
}

struct DarwinExecutor {
    window: Arc<dyn WindowHandle>,
    keys: MovementKeys,
    hold: Duration,
}

impl DarwinExecutor {
    fn target(&self) -> Result<(Rect, i32), ActionError> {
        let info = lookup(self.window.id()).ok_or(ActionError::WindowGone)?;
        let rect = info.bounds.ok_or(ActionError::WindowGone)?;
        let pid = info.pid.ok_or_else(|| ActionError::Os("window has no owner pid".into()))?;
        Ok((rect, pid))
    }

    fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<(), ActionError> {
        let (rect, pid) = self.target()?;
        let point = CGPoint::new((rect.x + x) as f64, (rect.y + y) as f64);
        let (down, up, cg_button) = match button {
            MouseButton::Left => (CGEventType::LeftMouseDown, CGEventType::LeftMouseUp, CGMouseButton::Left),
            MouseButton::Right => (CGEventType::RightMouseDown, CGEventType::RightMouseUp, CGMouseButton::Right),
        };
        let source = event_source()?;

        let event = CGEvent::new_mouse_event(source.clone(), down, point, cg_button)
            .map_err(|_| ActionError::Os("mouse down event".into()))?;
        event.post_to_pid(pid);
        sleep::sleep_ms(15);
        let event = CGEvent::new_mouse_event(source, up, point, cg_button)
            .map_err(|_| ActionError::Os("mouse up event".into()))?;
        event.post_to_pid(pid);
        Ok(())
    }

    fn tap(&self, key: &str) -> Result<(), ActionError> {
        let (_, pid) = self.target()?;

        // Parse modifiers (cmd+a, shift+up, etc)
        let parts: Vec<&str> = key.split('+').collect();
        let main_key = parts.last().copied().unwrap_or(key).to_lowercase();
        let modifiers: Vec<&str> = parts[..parts.len().saturating_sub(1)]
            .iter()
            .filter_map(|part| match part.to_lowercase().as_str() {
                "cmd" | "command" => Some("command down"),
                "shift" => Some("shift down"),
                "ctrl" | "control" => Some("control down"),
                "alt" | "option" => Some("option down"),
                _ => None,
            })
            .collect();

        let key_part = if let Some(code) = applescript_key_code(&main_key) {
            format!("key code {}", code)
        } else if main_key.chars().count() == 1 {
            format!("keystroke \"{}\"", main_key.replace('"', "\\\""))
        } else {
            return Err(ActionError::Unsupported(format!("key '{}'", key)));
        };

        let modifier_str = if modifiers.is_empty() {
            String::new()
        } else {
            format!(" using {{{}}}", modifiers.join(", "))
        };
        run_osascript(&format!(
            "tell application \"System Events\" to tell process id {} to {}{}",
            pid, key_part, modifier_str
        ));
        Ok(())
    }

    fn hold(&self, key: &str) -> Result<(), ActionError> {
        let (_, pid) = self.target()?;
        let code = virtual_key_code(key).ok_or_else(|| ActionError::Unsupported(format!("hold '{}'", key)))?;
        let source = event_source()?;

        let down = CGEvent::new_keyboard_event(source.clone(), code, true)
            .map_err(|_| ActionError::Os("key down event".into()))?;
        down.post_to_pid(pid);
        sleep::sleep_jitter(self.hold);
        let up = CGEvent::new_keyboard_event(source, code, false)
            .map_err(|_| ActionError::Os("key up event".into()))?;
        up.post_to_pid(pid);
        Ok(())
    }
}

impl ActionExecutor for DarwinExecutor {
    fn perform(&mut self, action: &Action) -> Result<(), ActionError> {
        match action {
            Action::PressKey(key) => self.tap(key),
            Action::Click { x, y, button } => self.click(*x, *y, *button),
            Action::MoveDirection(dir) => {
                let key = self.keys.key_for(*dir).to_string();
                self.hold(&key)
            }
        }
    }
}

fn event_source() -> Result<CGEventSource, ActionError> {
    CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|_| ActionError::Os("CGEventSource unavailable".into()))
}

fn run_osascript(script: &str) {
    ProcessCommand::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .ok();
}

// --- CF Dictionary helpers ---

unsafe fn get_cf_string(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<String> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_str: CFString = CFString::wrap_under_get_rule(*value as _);
    Some(cf_str.to_string())
}

unsafe fn get_cf_number(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<i64> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_num: CFNumber = CFNumber::wrap_under_get_rule(*value as _);
    cf_num.to_i64()
}

unsafe fn get_cf_dict(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<CFDictionary<CFString, *const std::ffi::c_void>> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    Some(CFDictionary::wrap_under_get_rule(*value as _))
}
