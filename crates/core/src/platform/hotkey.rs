use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Emergency-stop chord shown in the UI.
#[cfg(target_os = "macos")]
pub const STOP_CHORD: &str = "Cmd+Shift+End";
#[cfg(not(target_os = "macos"))]
pub const STOP_CHORD: &str = "Ctrl+Shift+End";

/// Start a background thread that listens for the global hotkey Cmd+Shift+End.
/// Sets `flag` to `true` when the hotkey is pressed.
#[cfg(target_os = "macos")]
pub fn start_stop_listener(flag: Arc<AtomicBool>) {
    use std::ffi::c_void;

    type CGEventTapProxy = *mut c_void;
    type CGEventRef = *mut c_void;
    type CFMachPortRef = *mut c_void;
    type CFRunLoopSourceRef = *mut c_void;
    type CFRunLoopRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CGEventMask = u64;
    type CGEventType = u32;
    type CGEventFlags = u64;

    type CGEventTapCallBack = unsafe extern "C" fn(
        CGEventTapProxy,
        CGEventType,
        CGEventRef,
        *mut c_void,
    ) -> CGEventRef;

    const K_CG_HID_EVENT_TAP: u32 = 0;
    const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
    const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: u32 = 1;
    const CG_EVENT_KEY_DOWN: u32 = 10;
    const K_CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;

    const K_CG_EVENT_FLAG_MASK_SHIFT: u64 = 0x00020000;
    const K_CG_EVENT_FLAG_MASK_COMMAND: u64 = 0x00100000;

    const KEYCODE_END: i64 = 119;

    extern "C" {
        fn CGEventTapCreate(
            tap: u32,
            place: u32,
            options: u32,
            events_of_interest: CGEventMask,
            callback: CGEventTapCallBack,
            user_info: *mut c_void,
        ) -> CFMachPortRef;
        fn CFMachPortCreateRunLoopSource(allocator: *const c_void, port: CFMachPortRef, order: i64) -> CFRunLoopSourceRef;
        fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRun();
        fn CGEventGetFlags(event: CGEventRef) -> CGEventFlags;
        fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

        static kCFRunLoopCommonModes: CFStringRef;
    }

    unsafe extern "C" fn on_key(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        event: CGEventRef,
        user_info: *mut c_void,
    ) -> CGEventRef {
        if event_type != CG_EVENT_KEY_DOWN {
            return event;
        }
        let flags = CGEventGetFlags(event);
        let keycode = CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_KEYCODE);
        let chord = K_CG_EVENT_FLAG_MASK_COMMAND | K_CG_EVENT_FLAG_MASK_SHIFT;
        if keycode == KEYCODE_END && flags & chord == chord {
            let flag = &*(user_info as *const AtomicBool);
            flag.store(true, Ordering::Release);
        }
        event
    }

    std::thread::spawn(move || unsafe {
        let flag_ptr = Arc::into_raw(flag) as *mut c_void;
        let tap = CGEventTapCreate(
            K_CG_HID_EVENT_TAP,
            K_CG_HEAD_INSERT_EVENT_TAP,
            K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
            1 << CG_EVENT_KEY_DOWN,
            on_key,
            flag_ptr,
        );
        if tap.is_null() {
            crate::logger::error(
                "failed to create event tap for the stop hotkey, grant Accessibility permission to your terminal",
            );
            let _ = Arc::from_raw(flag_ptr as *const AtomicBool);
            return;
        }

        let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        CFRunLoopAddSource(CFRunLoopGetCurrent(), source, kCFRunLoopCommonModes);
        CGEventTapEnable(tap, true);
        crate::logger::info(&format!("emergency stop hotkey {} armed", STOP_CHORD));
        CFRunLoopRun();
    });
}

/// Start a background thread that listens for the global hotkey Ctrl+Shift+End.
/// Sets `flag` to `true` when the hotkey is pressed.
#[cfg(target_os = "windows")]
pub fn start_stop_listener(flag: Arc<AtomicBool>) {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Input::KeyboardAndMouse::{RegisterHotKey, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT};
    use windows::Win32::UI::WindowsAndMessaging::{GetMessageW, MSG, WM_HOTKEY};

    const VK_END: u32 = 0x23;
    const HOTKEY_ID: i32 = 0x5107;

    std::thread::spawn(move || unsafe {
        let no_window = HWND(std::ptr::null_mut());
        if let Err(e) = RegisterHotKey(no_window, HOTKEY_ID, MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT, VK_END) {
            crate::logger::error(&format!("failed to register stop hotkey {}: {}", STOP_CHORD, e));
            return;
        }
        crate::logger::info(&format!("emergency stop hotkey {} armed", STOP_CHORD));

        let mut msg = MSG::default();
        // Returns 0 on WM_QUIT, -1 on error
        while GetMessageW(&mut msg, no_window, 0, 0).0 > 0 {
            if msg.message == WM_HOTKEY && msg.wParam.0 == HOTKEY_ID as usize {
                flag.store(true, Ordering::Release);
            }
        }
    });
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn start_stop_listener(_flag: Arc<AtomicBool>) {
    crate::logger::warn("no global stop hotkey on this platform");
}

/// Take a pending hotkey press, clearing it.
pub fn take(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::AcqRel)
}
