use std::sync::Once;

use veneer_core::PlatformResult;
use veneer_core::config::WindowConfig;
use veneer_core::focus::{WindowHandle, WindowSystem};
use windows::Win32::Foundation::{COLORREF, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::{AttachThreadInput, GetCurrentThreadId};
use windows::Win32::UI::Input::KeyboardAndMouse::GetActiveWindow;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GWL_EXSTYLE,
    GetSystemMetrics, GetWindowLongPtrW, GetWindowThreadProcessId,
    LWA_ALPHA, MSG, PM_REMOVE, PeekMessageW, PostQuitMessage, RegisterClassW, SM_CXSCREEN,
    SM_CYSCREEN, SW_SHOWNOACTIVATE, SetForegroundWindow, SetLayeredWindowAttributes,
    SetWindowLongPtrW, ShowWindow, TranslateMessage, WINDOW_EX_STYLE, WM_DESTROY, WM_HOTKEY,
    WM_QUIT, WNDCLASSW, WS_EX_LAYERED, WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_EX_TRANSPARENT,
    WS_OVERLAPPEDWINDOW, WS_POPUP, WS_VISIBLE,
};
use windows::core::{HSTRING, PCWSTR, w};

use crate::hook::true_foreground_window;

const CLASS_NAME: PCWSTR = w!("VeneerTarget");

/// Window-mode size. Fullscreen otherwise.
const WINDOWED_SIZE: (i32, i32) = (1280, 720);

static REGISTER_CLASS: Once = Once::new();

fn ensure_class_registered() {
    REGISTER_CLASS.call_once(|| {
        let wc = WNDCLASSW {
            lpfnWndProc: Some(target_wnd_proc),
            lpszClassName: CLASS_NAME,
            ..Default::default()
        };
        // SAFETY: the class struct points at a static name and a valid
        // window procedure.
        unsafe {
            RegisterClassW(&wc);
        }
    });
}

unsafe extern "system" fn target_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_DESTROY {
        // SAFETY: posts WM_QUIT to this thread's queue.
        unsafe { PostQuitMessage(0) };
        return LRESULT(0);
    }
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

/// What one pass of the message pump saw.
#[derive(Debug, Default)]
pub struct Pumped {
    pub quit: bool,
    pub hotkeys: Vec<i32>,
}

/// The session's own window: a near-transparent, topmost layered window
/// the host platform sees as the focused title.
///
/// Starts click-through; the focus arbiter turns that off while pinned.
pub struct TargetWindow {
    hwnd: HWND,
}

impl TargetWindow {
    pub fn create(title: &str, config: &WindowConfig) -> PlatformResult<Self> {
        ensure_class_registered();

        let mut ex = WS_EX_LAYERED | WS_EX_TOPMOST | WS_EX_TRANSPARENT;
        if config.hide_alt_tab {
            ex |= WS_EX_TOOLWINDOW;
        }
        let (style, width, height) = if config.window_mode {
            (WS_OVERLAPPEDWINDOW, WINDOWED_SIZE.0, WINDOWED_SIZE.1)
        } else {
            // SAFETY: plain metric queries.
            let size = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
            (WS_POPUP, size.0, size.1)
        };
        let title = HSTRING::from(if title.is_empty() { "Veneer" } else { title });

        // SAFETY: the class is registered above; every pointer argument is
        // either null or valid for the duration of the call.
        let hwnd = unsafe {
            CreateWindowExW(
                ex,
                CLASS_NAME,
                &title,
                style | WS_VISIBLE,
                0,
                0,
                width,
                height,
                None,
                None,
                None,
                None,
            )?
        };

        // SAFETY: hwnd was just created on this thread.
        unsafe {
            SetLayeredWindowAttributes(hwnd, COLORREF(0), 1, LWA_ALPHA)?;
            let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
        }
        tracing::debug!("Created target window {:#x} ({width}x{height})", hwnd.0 as usize);

        Ok(Self { hwnd })
    }

    pub fn handle(&self) -> WindowHandle {
        self.hwnd.0 as usize
    }

    /// Whether this window is the active one on its thread. Unlike the
    /// foreground query, this isn't intercepted.
    pub fn has_focus(&self) -> bool {
        // SAFETY: no arguments; returns null when the thread has no
        // active window.
        unsafe { GetActiveWindow() == self.hwnd }
    }

    /// Dispatches everything queued for this thread without blocking.
    pub fn pump(&self) -> Pumped {
        let mut pumped = Pumped::default();
        let mut msg = MSG::default();

        // SAFETY: PeekMessageW fills `msg` from this thread's queue.
        while unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() } {
            match msg.message {
                WM_QUIT => pumped.quit = true,
                WM_HOTKEY => pumped.hotkeys.push(msg.wParam.0 as i32),
                _ => unsafe {
                    let _ = TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                },
            }
        }
        pumped
    }
}

impl Drop for TargetWindow {
    fn drop(&mut self) {
        // SAFETY: the window belongs to this thread and is destroyed once.
        unsafe {
            let _ = DestroyWindow(self.hwnd);
        }
    }
}

fn hwnd(window: WindowHandle) -> HWND {
    HWND(window as *mut _)
}

/// The desktop window manager.
#[derive(Debug, Default)]
pub struct Desktop;

impl WindowSystem for Desktop {
    /// Reads past the foreground hook, which may be installed.
    fn foreground_window(&mut self) -> WindowHandle {
        true_foreground_window().0 as usize
    }

    fn bring_to_front(&mut self, window: WindowHandle) -> bool {
        let target = hwnd(window);
        // SAFETY: joining the foreground thread's input queue is what
        // allows a background process to take the foreground. The join
        // is undone before returning.
        unsafe {
            let foreground = true_foreground_window();
            let foreground_thread = GetWindowThreadProcessId(foreground, None);
            let own_thread = GetCurrentThreadId();
            let attached = foreground_thread != 0
                && foreground_thread != own_thread
                && AttachThreadInput(foreground_thread, own_thread, true).as_bool();
            let done = SetForegroundWindow(target).as_bool();
            if attached {
                let _ = AttachThreadInput(foreground_thread, own_thread, false);
            }
            done
        }
    }

    fn set_click_through(&mut self, window: WindowHandle, enabled: bool) {
        let target = hwnd(window);
        // SAFETY: reads and writes the extended style of a window owned by
        // this process.
        unsafe {
            let style = WINDOW_EX_STYLE(GetWindowLongPtrW(target, GWL_EXSTYLE) as u32);
            let style = if enabled {
                style | WS_EX_TRANSPARENT
            } else {
                WINDOW_EX_STYLE(style.0 & !WS_EX_TRANSPARENT.0)
            };
            SetWindowLongPtrW(target, GWL_EXSTYLE, style.0 as isize);
        }
    }

    fn window_pid(&self, window: WindowHandle) -> Option<u32> {
        let mut pid = 0u32;
        // SAFETY: GetWindowThreadProcessId writes the owning pid.
        let thread = unsafe { GetWindowThreadProcessId(hwnd(window), Some(&mut pid)) };
        (thread != 0 && pid != 0).then_some(pid)
    }
}
