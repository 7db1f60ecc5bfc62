use windows::Win32::UI::Input::KeyboardAndMouse::{
    HOT_KEY_MODIFIERS, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT, RegisterHotKey, UnregisterHotKey,
    VK_F12,
};

/// What a registered hotkey does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    /// Flip the pinned settings-surface focus.
    ToggleForcedFocus,
}

/// A registered global hotkey.
struct Hotkey {
    id: i32,
    action: HotkeyAction,
}

/// Manages global hotkey registrations.
///
/// Hotkeys are registered on the current thread's message queue, so
/// `WM_HOTKEY` arrives through the frame loop's own message pump.
pub struct HotkeyManager {
    hotkeys: Vec<Hotkey>,
}

impl HotkeyManager {
    pub fn new() -> Self {
        Self {
            hotkeys: Vec::new(),
        }
    }

    /// Registers the session's fixed bindings. Ctrl+Shift+F12 toggles
    /// forced focus.
    pub fn register_defaults(&mut self) {
        self.register(
            1,
            MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT,
            u32::from(VK_F12.0),
            HotkeyAction::ToggleForcedFocus,
        );
    }

    /// Maps a `WM_HOTKEY` id back to its action.
    pub fn dispatch(&self, hotkey_id: i32) -> Option<HotkeyAction> {
        self.hotkeys
            .iter()
            .find(|h| h.id == hotkey_id)
            .map(|h| h.action)
    }

    fn register(&mut self, id: i32, modifiers: HOT_KEY_MODIFIERS, vk: u32, action: HotkeyAction) {
        // SAFETY: RegisterHotKey registers a system-wide hotkey on the
        // current thread's message queue. Ids are unique per manager.
        let result = unsafe { RegisterHotKey(None, id, modifiers, vk) };

        if let Err(e) = result {
            tracing::warn!("Failed to register hotkey {id} (vk=0x{vk:02X}): {e}");
            return;
        }

        tracing::debug!("Registered hotkey {id} for {action:?}");
        self.hotkeys.push(Hotkey { id, action });
    }
}

impl Default for HotkeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        for hotkey in &self.hotkeys {
            // SAFETY: UnregisterHotKey removes the hotkey registration.
            unsafe {
                let _ = UnregisterHotKey(None, hotkey.id);
            }
        }
    }
}
