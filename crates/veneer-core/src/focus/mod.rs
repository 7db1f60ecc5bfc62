//! Focus arbitration.
//!
//! The host platform switches per-window controller bindings based on a
//! single "which window is in the foreground" query. The arbiter answers
//! that query for this process through an interception hook, and moves
//! real focus between the target window and the supervised application
//! when the overlay opens or the settings surface is toggled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::process::SharedPids;

/// Opaque window handle.
pub type WindowHandle = usize;

/// The window manager, minus the intercepted query's answer.
pub trait WindowSystem {
    /// The real foreground window. Called inside [`Suspended`].
    fn foreground_window(&mut self) -> WindowHandle;

    /// Makes `window` the foreground window for real. May read the real
    /// foreground window, so it is also called inside [`Suspended`].
    fn bring_to_front(&mut self, window: WindowHandle) -> bool;

    /// Lets mouse input pass through `window` to whatever is below.
    fn set_click_through(&mut self, window: WindowHandle, enabled: bool);

    /// Owning process of `window`.
    fn window_pid(&self, window: WindowHandle) -> Option<u32>;
}

/// The process-local interception of the foreground window query.
///
/// `install` and `remove` are idempotent.
pub trait ForegroundInterceptor {
    /// Returns whether the interception is in place afterwards.
    fn install(&mut self) -> bool;
    fn remove(&mut self);
    fn is_installed(&self) -> bool;

    /// Whether the interception has to be removed for the window system
    /// to read the real foreground window. Implementations that read past
    /// it return false, which spares a patch per frame.
    fn lift_for_real_reads(&self) -> bool {
        true
    }
}

/// Focus state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    Normal,
    OverlayOpen,
    /// The target window is pinned as the foreground window to show the
    /// settings surface.
    ForcedFocus,
}

/// Inputs to the intercepted query shared with the hook, which may run on
/// any thread of the process.
#[derive(Debug)]
pub struct FocusFlags {
    own_window: WindowHandle,
    pinned: AtomicBool,
    allow_desktop: AtomicBool,
    pids: SharedPids,
}

impl FocusFlags {
    pub fn new(own_window: WindowHandle, allow_desktop: bool, pids: SharedPids) -> Self {
        Self {
            own_window,
            pinned: AtomicBool::new(false),
            allow_desktop: AtomicBool::new(allow_desktop),
            pids,
        }
    }

    pub fn own_window(&self) -> WindowHandle {
        self.own_window
    }

    pub fn set_allow_desktop(&self, allow: bool) {
        self.allow_desktop.store(allow, Ordering::Relaxed);
    }

    /// The intercepted query's answer for a real foreground window owned
    /// by `real_pid`.
    ///
    /// The target window, unless nothing is pinned, desktop bindings are
    /// allowed, and the real window belongs to the supervised tree.
    pub fn answer(&self, real: WindowHandle, real_pid: Option<u32>) -> WindowHandle {
        if self.pinned.load(Ordering::Relaxed) || !self.allow_desktop.load(Ordering::Relaxed) {
            return self.own_window;
        }
        match real_pid {
            Some(pid) if self.pids.contains(pid) => real,
            _ => self.own_window,
        }
    }
}

/// Removes the interception for its lifetime and puts it back on drop, if
/// it was installed to begin with and has to be lifted for real reads.
pub struct Suspended<'a, I: ForegroundInterceptor + ?Sized> {
    interceptor: &'a mut I,
    was_installed: bool,
}

impl<'a, I: ForegroundInterceptor + ?Sized> Suspended<'a, I> {
    pub fn new(interceptor: &'a mut I) -> Self {
        let was_installed = interceptor.is_installed() && interceptor.lift_for_real_reads();
        if was_installed {
            interceptor.remove();
        }
        Self {
            interceptor,
            was_installed,
        }
    }
}

impl<I: ForegroundInterceptor + ?Sized> Drop for Suspended<'_, I> {
    fn drop(&mut self) {
        if self.was_installed {
            self.interceptor.install();
        }
    }
}

pub struct FocusArbiter {
    windows: Box<dyn WindowSystem>,
    interceptor: Box<dyn ForegroundInterceptor>,
    flags: Arc<FocusFlags>,
    last_real_foreground: Option<WindowHandle>,
    overlay_open: bool,
    forced_focus: bool,
    hook_unavailable: bool,
}

impl FocusArbiter {
    pub fn new(
        windows: Box<dyn WindowSystem>,
        interceptor: Box<dyn ForegroundInterceptor>,
        flags: Arc<FocusFlags>,
    ) -> Self {
        Self {
            windows,
            interceptor,
            flags,
            last_real_foreground: None,
            overlay_open: false,
            forced_focus: false,
            hook_unavailable: false,
        }
    }

    pub fn flags(&self) -> &Arc<FocusFlags> {
        &self.flags
    }

    pub fn mode(&self) -> FocusMode {
        if self.forced_focus {
            FocusMode::ForcedFocus
        } else if self.overlay_open {
            FocusMode::OverlayOpen
        } else {
            FocusMode::Normal
        }
    }

    pub fn last_real_foreground(&self) -> Option<WindowHandle> {
        self.last_real_foreground
    }

    pub fn hook_installed(&self) -> bool {
        self.interceptor.is_installed()
    }

    /// Installs the interception. Called at session start.
    pub fn install_hook(&mut self) {
        if self.hook_unavailable {
            return;
        }
        if self.interceptor.install() {
            tracing::debug!("Foreground window hook installed");
        } else {
            tracing::error!("Couldn't install foreground window hook; focus pinning disabled");
            self.hook_unavailable = true;
        }
    }

    pub fn remove_hook(&mut self) {
        if self.interceptor.is_installed() {
            self.interceptor.remove();
            tracing::debug!("Foreground window hook removed");
        }
    }

    /// The real foreground window, read with the interception lifted.
    pub fn real_foreground(&mut self) -> WindowHandle {
        let _suspended = Suspended::new(self.interceptor.as_mut());
        self.windows.foreground_window()
    }

    /// What the intercepted query reports right now.
    pub fn intercepted_foreground(&mut self) -> WindowHandle {
        let real = self.real_foreground();
        let pid = self.windows.window_pid(real);
        self.flags.answer(real, pid)
    }

    /// Reacts to a committed overlay transition.
    pub fn on_overlay(&mut self, open: bool) {
        if open == self.overlay_open {
            return;
        }
        let before = self.mode();
        self.overlay_open = open;
        self.transition(before);
    }

    pub fn toggle_forced_focus(&mut self) {
        self.set_forced_focus(!self.forced_focus);
    }

    pub fn set_forced_focus(&mut self, forced: bool) {
        if forced == self.forced_focus {
            return;
        }
        let before = self.mode();
        self.forced_focus = forced;
        self.transition(before);
    }

    /// Per-frame bookkeeping: keeps the last real foreground window
    /// current while nothing is pinned.
    pub fn tick(&mut self) {
        if self.mode() == FocusMode::Normal {
            self.capture_real_foreground();
        }
    }

    fn capture_real_foreground(&mut self) {
        let real = self.real_foreground();
        if real != 0 && real != self.flags.own_window {
            self.last_real_foreground = Some(real);
        }
    }

    fn transition(&mut self, before: FocusMode) {
        let after = self.mode();
        if before == after {
            return;
        }
        tracing::info!("Focus {before:?} -> {after:?}");

        let own = self.flags.own_window;
        match (before, after) {
            (FocusMode::Normal, _) => {
                self.capture_real_foreground();
                self.flags.pinned.store(true, Ordering::Relaxed);
                let _suspended = Suspended::new(self.interceptor.as_mut());
                self.windows.set_click_through(own, false);
                if !self.windows.bring_to_front(own) {
                    tracing::warn!("Couldn't bring target window to the foreground");
                }
            }
            (_, FocusMode::Normal) => {
                self.flags.pinned.store(false, Ordering::Relaxed);
                let _suspended = Suspended::new(self.interceptor.as_mut());
                self.windows.set_click_through(own, true);
                if let Some(window) = self.last_real_foreground
                    && !self.windows.bring_to_front(window)
                {
                    tracing::warn!("Couldn't restore focus to window {window:#x}");
                }
            }
            // Between the two pinned states focus stays where it is.
            _ => {}
        }
    }
}
