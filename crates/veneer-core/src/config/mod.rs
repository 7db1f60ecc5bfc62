mod loader;

use serde::{Deserialize, Serialize};

use crate::log::LogConfig;

pub use loader::{data_dir, from_str, load, resolve_path, targets_dir, try_load};

/// Highest number of virtual controller slots the input subsystem exposes.
pub const MAX_SLOTS: i32 = 4;

/// Top-level session configuration.
///
/// Loaded once from a JSON target file at start. Every section and every
/// field falls back to its default individually, so a partial or slightly
/// malformed document still yields a usable session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Document schema version. Only `1` is known.
    pub version: u32,
    /// Display name of the target.
    pub name: String,
    /// Icon path of the target.
    pub icon: String,
    /// Raises the log filter to `trace`.
    pub extended_logging: bool,
    pub launch: LaunchConfig,
    pub devices: DeviceConfig,
    pub controller: ControllerConfig,
    pub window: WindowConfig,
    pub logging: LogConfig,
    /// Derived from `launch.launch_path` by [`Config::finalize`].
    #[serde(skip)]
    is_uwp: bool,
}

/// How (and whether) to start the wrapped application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchConfig {
    /// Whether to launch anything at all.
    pub launch: bool,
    /// Executable path, package identity, or URL.
    pub launch_path: String,
    /// Arguments passed through verbatim.
    pub launch_app_args: String,
    /// End the session when the launched application exits.
    pub close_on_exit: bool,
    /// Track descendants and only end once all of them exited.
    #[serde(rename = "waitForChildProcs")]
    pub wait_for_child_processes: bool,
    /// Image names of secondary launchers (e.g. a storefront client).
    pub launcher_processes: Vec<String>,
    /// Leave launcher processes out of `launched_pids()`.
    pub ignore_launcher: bool,
    /// Terminate launcher processes too when cleaning up after a crash.
    pub kill_launcher: bool,
}

/// Device hiding policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Hide real gaming devices from everything but the allow-list.
    pub hide_devices: bool,
    /// Emulate with the profile's stock vendor/product ids.
    #[serde(rename = "realDeviceIds")]
    pub use_real_vendor_product_ids: bool,
}

/// Virtual controller emulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Number of emulated slots, clamped to `0..=MAX_SLOTS`.
    #[serde(rename = "maxControllers")]
    pub max_slots: i32,
    /// Fall back to the desktop input profile while the launched
    /// application itself holds focus.
    #[serde(rename = "allowDesktopConfig")]
    pub allow_desktop_config_when_unfocused: bool,
    /// Emulate the alternate (DS4) profile instead of the standard pad.
    #[serde(rename = "emulateDS4")]
    pub emulate_alternate_profile: bool,
}

/// Target window behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowConfig {
    pub window_mode: bool,
    /// Frame cap; `0` means the default pacing.
    pub max_fps: i32,
    pub scale: f32,
    pub disable_overlay: bool,
    pub hide_alt_tab: bool,
}

/// Overrides supplied on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub extended_logging: bool,
    pub ignore_launcher: bool,
    pub window_mode: bool,
}

/// How the launch path is to be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    /// A native executable on disk.
    Native,
    /// A platform package activated by its identity string.
    Package,
    /// A URL handed to the shell.
    Url,
}

impl LaunchKind {
    /// Classifies a launch path by its shape.
    ///
    /// `scheme://...` is a URL. Anything starting with a short drive-like
    /// prefix (`C:`, `\\?\C:` style prefixes up to five characters) is a
    /// native path. Everything else is a package identity.
    pub fn from_path(path: &str) -> Self {
        if path.contains("://") {
            return Self::Url;
        }
        if has_drive_prefix(path) {
            Self::Native
        } else {
            Self::Package
        }
    }
}

/// Matches `^.{1,5}:`.
fn has_drive_prefix(path: &str) -> bool {
    path.chars()
        .take(6)
        .enumerate()
        .any(|(i, c)| c == ':' && (1..=5).contains(&i))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            name: String::new(),
            icon: String::new(),
            extended_logging: false,
            launch: LaunchConfig::default(),
            devices: DeviceConfig::default(),
            controller: ControllerConfig::default(),
            window: WindowConfig::default(),
            logging: LogConfig::default(),
            is_uwp: false,
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            launch: false,
            launch_path: String::new(),
            launch_app_args: String::new(),
            close_on_exit: true,
            wait_for_child_processes: true,
            launcher_processes: Vec::new(),
            ignore_launcher: true,
            kill_launcher: false,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hide_devices: true,
            use_real_vendor_product_ids: false,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_slots: 1,
            allow_desktop_config_when_unfocused: false,
            emulate_alternate_profile: false,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_mode: false,
            max_fps: 0,
            scale: 0.0,
            disable_overlay: false,
            hide_alt_tab: true,
        }
    }
}

impl Config {
    /// Clamps numeric values to their supported ranges.
    pub fn validate(&mut self) {
        self.controller.max_slots = self.controller.max_slots.clamp(0, MAX_SLOTS);
        self.window.max_fps = self.window.max_fps.clamp(0, 1000);
        self.window.scale = self.window.scale.clamp(0.0, 4.0);
    }

    /// Validates and computes the derived fields. Called once after load.
    pub fn finalize(&mut self) {
        self.validate();
        self.is_uwp = self.launch.launch && self.launch_kind() == LaunchKind::Package;
    }

    /// Applies command-line overrides on top of the loaded document.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if overrides.extended_logging {
            self.extended_logging = true;
        }
        if overrides.ignore_launcher {
            self.launch.ignore_launcher = true;
        }
        if overrides.window_mode {
            self.window.window_mode = true;
        }
    }

    /// Whether the launch path names a platform package. Cached at load.
    pub fn is_uwp(&self) -> bool {
        self.is_uwp
    }

    pub fn launch_kind(&self) -> LaunchKind {
        LaunchKind::from_path(&self.launch.launch_path)
    }

    /// Number of emulated slots as an index bound.
    pub fn max_slots(&self) -> usize {
        self.controller.max_slots.clamp(0, MAX_SLOTS) as usize
    }

    /// The effective configuration as served by the control endpoint.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests;
