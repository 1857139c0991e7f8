//! GDI capture and PostMessage input for Windows clients.
//!
//! Every DC, bitmap and selection is held by a drop guard so each strategy
//! releases what it acquired on every exit path.

use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT, TRUE, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BitBlt, ClientToScreen, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
    GetDIBits, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBITMAP, HDC,
    CAPTUREBLT, HGDIOBJ, ROP_CODE, SRCCOPY,
};
use windows::Win32::Storage::Xps::{PrintWindow, PRINT_WINDOW_FLAGS};
use windows::Win32::UI::Input::KeyboardAndMouse::{MapVirtualKeyW, MAPVK_VK_TO_VSC};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClientRect, GetWindowTextLengthW, GetWindowTextW, IsWindow, IsWindowVisible, PostMessageW,
    SetForegroundWindow, WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MOUSEMOVE, WM_RBUTTONDOWN,
    WM_RBUTTONUP,
};

use crate::capture::{CaptureStrategy, Frame};
use crate::error::{ActionError, CaptureError};
use crate::logger;
use crate::sleep;
use crate::types::*;
use super::{ActionExecutor, Platform, WindowHandle};

const PW_CLIENTONLY: u32 = 0x1;
const PW_RENDERFULLCONTENT: u32 = 0x2;
const MK_LBUTTON: usize = 0x1;
const MK_RBUTTON: usize = 0x2;

pub struct Win32Platform;

fn hwnd(id: WindowId) -> HWND {
    HWND(id as isize as *mut c_void)
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let out = &mut *(lparam.0 as *mut Vec<(WindowId, String)>);
    if !IsWindowVisible(hwnd).as_bool() {
        return TRUE;
    }
    let title = window_text(hwnd);
    if !title.is_empty() {
        out.push((hwnd.0 as isize as WindowId, title));
    }
    TRUE
}

unsafe fn window_text(hwnd: HWND) -> String {
    let length = GetWindowTextLengthW(hwnd);
    if length <= 0 {
        return String::new();
    }
    let mut buffer = vec![0u16; length as usize + 1];
    let copied = GetWindowTextW(hwnd, &mut buffer);
    String::from_utf16_lossy(&buffer[..copied.max(0) as usize])
}

impl Platform for Win32Platform {
    fn name(&self) -> &'static str {
        "gdi"
    }

    fn find_windows(&self, pattern: &Regex) -> Vec<(WindowId, String)> {
        let mut all: Vec<(WindowId, String)> = Vec::new();
        unsafe {
            if let Err(e) = EnumWindows(Some(collect_window), LPARAM(&mut all as *mut _ as isize)) {
                logger::warn_p("gdi", &format!("EnumWindows failed: {}", e));
            }
        }
        all.into_iter()
            .filter(|(_, title)| pattern.is_match(title))
            .inspect(|(id, title)| logger::info_p("gdi", &format!("found window: \"{}\" (hwnd: {:#x})", title, id)))
            .collect()
    }

    fn window(&self, id: WindowId) -> Arc<dyn WindowHandle> {
        Arc::new(Win32Window { id })
    }

    fn strategies(&self) -> Vec<Arc<dyn CaptureStrategy>> {
        vec![
            Arc::new(PrintWindowCapture { name: "print_window_full", flags: PW_CLIENTONLY | PW_RENDERFULLCONTENT }),
            Arc::new(PrintWindowCapture { name: "print_window", flags: PW_CLIENTONLY }),
            Arc::new(BlitCapture { name: "window_dc_blit", from_screen: false }),
            Arc::new(BlitCapture { name: "screen_dc_blit", from_screen: true }),
        ]
    }

    fn executor(&self, window: Arc<dyn WindowHandle>, keys: &KeyBindings) -> Box<dyn ActionExecutor> {
        Box::new(PostMessageExecutor { id: window.id(), keys: keys.movement.clone() })
    }
}

/// Stores the HWND as an integer; the raw pointer type is not Send.
struct Win32Window {
    id: WindowId,
}

impl WindowHandle for Win32Window {
    fn id(&self) -> WindowId {
        self.id
    }

    fn title(&self) -> String {
        unsafe { window_text(hwnd(self.id)) }
    }

    fn rect(&self) -> Option<Rect> {
        unsafe { client_rect(hwnd(self.id)) }
    }

    fn activate(&self) {
        unsafe {
            let _ = SetForegroundWindow(hwnd(self.id));
        }
    }
}

/// Client area in screen coordinates.
unsafe fn client_rect(hwnd: HWND) -> Option<Rect> {
    if !IsWindow(hwnd).as_bool() {
        return None;
    }
    let mut rc = RECT::default();
    GetClientRect(hwnd, &mut rc).ok()?;
    let mut origin = POINT { x: 0, y: 0 };
    if !ClientToScreen(hwnd, &mut origin).as_bool() {
        return None;
    }
    let w = (rc.right - rc.left).max(0) as u32;
    let h = (rc.bottom - rc.top).max(0) as u32;
    Some(Rect::new(origin.x, origin.y, w, h))
}

// --- drop guards ---

struct SourceDc {
    owner: HWND,
    dc: HDC,
}

impl SourceDc {
    unsafe fn get(owner: HWND) -> Option<Self> {
        let dc = GetDC(owner);
        (!dc.is_invalid()).then_some(Self { owner, dc })
    }
}

impl Drop for SourceDc {
    fn drop(&mut self) {
        unsafe {
            ReleaseDC(self.owner, self.dc);
        }
    }
}

struct MemDc(HDC);

impl Drop for MemDc {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteDC(self.0);
        }
    }
}

struct Bitmap(HBITMAP);

impl Drop for Bitmap {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteObject(HGDIOBJ(self.0 .0));
        }
    }
}

struct Selection {
    dc: HDC,
    previous: HGDIOBJ,
}

impl Drop for Selection {
    fn drop(&mut self) {
        unsafe {
            SelectObject(self.dc, self.previous);
        }
    }
}

/// Compatible memory DC plus bitmap sized to the client area, drawn into by
/// `draw` and read back as top-down BGRA.
unsafe fn render_into_bitmap(
    strategy: &'static str,
    reference: &SourceDc,
    w: u32,
    h: u32,
    draw: impl FnOnce(HDC) -> Result<(), String>,
) -> Result<Frame, CaptureError> {
    let mem = MemDc(CreateCompatibleDC(reference.dc));
    if mem.0.is_invalid() {
        return Err(CaptureError::os(strategy, "CreateCompatibleDC failed"));
    }
    let bitmap = Bitmap(CreateCompatibleBitmap(reference.dc, w as i32, h as i32));
    if bitmap.0.is_invalid() {
        return Err(CaptureError::os(strategy, "CreateCompatibleBitmap failed"));
    }

    let selection = Selection { dc: mem.0, previous: SelectObject(mem.0, HGDIOBJ(bitmap.0 .0)) };
    draw(mem.0).map_err(|msg| CaptureError::os(strategy, msg))?;
    // GetDIBits wants the bitmap deselected
    drop(selection);

    let mut info = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: w as i32,
            biHeight: -(h as i32),
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let stride = w as usize * 4;
    let mut pixels = vec![0u8; stride * h as usize];
    let lines = GetDIBits(
        mem.0,
        bitmap.0,
        0,
        h,
        Some(pixels.as_mut_ptr() as *mut c_void),
        &mut info,
        DIB_RGB_COLORS,
    );
    if lines != h as i32 {
        return Err(CaptureError::os(strategy, format!("GetDIBits copied {} of {} lines", lines, h)));
    }

    Frame::from_bgra(&pixels, w, h, stride, false, strategy)
        .ok_or_else(|| CaptureError::os(strategy, "pixel buffer size mismatch"))
}

fn live_rect(strategy: &'static str, window: &dyn WindowHandle) -> Result<Rect, CaptureError> {
    let rect = window.rect().ok_or(CaptureError::WindowGone)?;
    if rect.is_empty() {
        // Minimized windows report an empty client area
        return Err(CaptureError::os(strategy, "client area is empty"));
    }
    Ok(rect)
}

/// PrintWindow asks the window to paint itself into our DC, which works while
/// the window is covered.
struct PrintWindowCapture {
    name: &'static str,
    flags: u32,
}

impl CaptureStrategy for PrintWindowCapture {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capture(&self, window: &dyn WindowHandle) -> Result<Frame, CaptureError> {
        let rect = live_rect(self.name, window)?;
        let target = hwnd(window.id());
        unsafe {
            let reference = SourceDc::get(target).ok_or_else(|| CaptureError::os(self.name, "GetDC failed"))?;
            render_into_bitmap(self.name, &reference, rect.w, rect.h, |mem| {
                if PrintWindow(target, mem, PRINT_WINDOW_FLAGS(self.flags)).as_bool() {
                    Ok(())
                } else {
                    Err("PrintWindow returned FALSE".into())
                }
            })
        }
    }
}

/// BitBlt from the window's client DC or from the desktop DC over the
/// client rectangle.
struct BlitCapture {
    name: &'static str,
    from_screen: bool,
}

impl CaptureStrategy for BlitCapture {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capture(&self, window: &dyn WindowHandle) -> Result<Frame, CaptureError> {
        let rect = live_rect(self.name, window)?;
        // Layered windows only show up in desktop blits with CAPTUREBLT
        let (owner, sx, sy, rop) = if self.from_screen {
            (HWND(std::ptr::null_mut()), rect.x, rect.y, ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0))
        } else {
            (hwnd(window.id()), 0, 0, SRCCOPY)
        };
        unsafe {
            let source = SourceDc::get(owner).ok_or_else(|| CaptureError::os(self.name, "GetDC failed"))?;
            render_into_bitmap(self.name, &source, rect.w, rect.h, |mem| {
                BitBlt(mem, 0, 0, rect.w as i32, rect.h as i32, source.dc, sx, sy, rop)
                    .map_err(|e| format!("BitBlt failed: {}", e))
            })
        }
    }
}

// --- input ---

/// Virtual key code for a platform-neutral key name.
fn virtual_key(key: &str) -> Option<u16> {
    let key = key.to_ascii_lowercase();
    let vk = match key.as_str() {
        "space" => 0x20,
        "enter" | "return" => 0x0D,
        "escape" | "esc" => 0x1B,
        "tab" => 0x09,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "shift" => 0x10,
        "ctrl" | "control" => 0x11,
        "alt" => 0x12,
        k if k.len() == 1 && k.as_bytes()[0].is_ascii_alphanumeric() => k.as_bytes()[0].to_ascii_uppercase() as u16,
        k if k.starts_with('f') => {
            let n: u16 = k[1..].parse().ok()?;
            if !(1..=12).contains(&n) {
                return None;
            }
            0x70 + n - 1
        }
        _ => return None,
    };
    Some(vk)
}

fn key_lparam(vk: u16, up: bool) -> LPARAM {
    let scan = unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) } as isize;
    let mut lparam = 1 | (scan << 16);
    if up {
        lparam |= (1 << 30) | (1 << 31);
    }
    LPARAM(lparam)
}

fn point_lparam(x: i32, y: i32) -> LPARAM {
    LPARAM((((y as u32 & 0xFFFF) << 16) | (x as u32 & 0xFFFF)) as isize)
}

struct PostMessageExecutor {
    id: WindowId,
    keys: MovementKeys,
}

impl PostMessageExecutor {
    fn post(&self, msg: u32, wparam: usize, lparam: LPARAM) -> Result<(), ActionError> {
        let target = hwnd(self.id);
        unsafe {
            if !IsWindow(target).as_bool() {
                return Err(ActionError::WindowGone);
            }
            PostMessageW(target, msg, WPARAM(wparam), lparam).map_err(|e| ActionError::Os(e.to_string()))
        }
    }

    /// "shift+q" style chords: modifiers down, key down, hold, release in reverse.
    fn chord(&self, key: &str, hold: Duration) -> Result<(), ActionError> {
        let vks = key
            .split('+')
            .map(|part| virtual_key(part).ok_or_else(|| ActionError::Unsupported(format!("key '{}'", key))))
            .collect::<Result<Vec<_>, _>>()?;
        for vk in &vks {
            self.post(WM_KEYDOWN, *vk as usize, key_lparam(*vk, false))?;
        }
        sleep::sleep_jitter(hold);
        for vk in vks.iter().rev() {
            self.post(WM_KEYUP, *vk as usize, key_lparam(*vk, true))?;
        }
        Ok(())
    }

    fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<(), ActionError> {
        let (down, up, mk) = match button {
            MouseButton::Left => (WM_LBUTTONDOWN, WM_LBUTTONUP, MK_LBUTTON),
            MouseButton::Right => (WM_RBUTTONDOWN, WM_RBUTTONUP, MK_RBUTTON),
        };
        let at = point_lparam(x, y);
        self.post(WM_MOUSEMOVE, 0, at)?;
        self.post(down, mk, at)?;
        sleep::sleep_ms(15);
        self.post(up, 0, at)
    }
}

impl ActionExecutor for PostMessageExecutor {
    fn perform(&mut self, action: &Action) -> Result<(), ActionError> {
        match action {
            Action::PressKey(key) => self.chord(key, Duration::from_millis(30)),
            Action::Click { x, y, button } => self.click(*x, *y, *button),
            Action::MoveDirection(dir) => {
                let key = self.keys.key_for(*dir).to_string();
                self.chord(&key, Duration::from_millis(self.keys.hold_ms))
            }
        }
    }
}
