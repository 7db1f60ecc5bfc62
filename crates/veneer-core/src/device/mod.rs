//! System-wide visibility of real gaming devices.
//!
//! Real controllers are hidden from every process except an allow-list
//! (the host platform), so games only see the emulated devices. The
//! filtering driver owns the allow and deny lists; this module only
//! reads, merges and writes them back inside an open/close bracket.

pub mod multi_sz;

use crate::controller::{EMULATED_PRODUCT_ID, EMULATED_VENDOR_ID};
use crate::error::DriverResult;

/// Host platform executables that keep seeing real devices.
pub const HOST_EXECUTABLES: [&str; 3] = ["GameOverlayUI.exe", "steam.exe", "streaming_client.exe"];

/// The device-filtering driver.
///
/// Every request needs an open handle. [`DeviceVisibilityController`]
/// brackets each batch of requests with `open` and `close`.
pub trait FilterDriver {
    fn open(&mut self) -> DriverResult<()>;
    fn close(&mut self);

    fn allow_list(&mut self) -> DriverResult<Vec<String>>;
    fn set_allow_list(&mut self, list: &[String]) -> DriverResult<()>;
    fn deny_list(&mut self) -> DriverResult<Vec<String>>;
    fn set_deny_list(&mut self, list: &[String]) -> DriverResult<()>;
    fn active(&mut self) -> DriverResult<bool>;
    fn set_active(&mut self, active: bool) -> DriverResult<()>;

    /// Converts a file path to the form the driver stores in its
    /// allow-list. `None` when it can't be converted.
    fn driver_path(&self, path: &str) -> Option<String> {
        Some(path.to_string())
    }
}

/// Enumerates present HID devices.
pub trait HidEnumerator {
    fn devices(&mut self) -> Vec<DeviceVisibilityEntry>;

    /// Full paths of the host platform executables.
    fn host_executables(&mut self) -> Vec<String>;
}

/// One enumerated HID device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceVisibilityEntry {
    pub name: String,
    /// Device instance path, e.g. `HID\VID_054C&PID_05C4\7&1234&0&0000`.
    pub instance_path: String,
    /// Instance path of the device's base container (the USB parent).
    pub container_path: String,
    pub container_id: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    /// Whether the path is on the deny-list as of the last refresh.
    pub hidden: bool,
}

impl DeviceVisibilityEntry {
    /// Generic desktop joystick or gamepad, or anything on the game
    /// controls page.
    pub fn is_gaming_class(&self) -> bool {
        self.usage_page == 0x05 || (self.usage_page == 0x01 && matches!(self.usage, 0x04 | 0x05))
    }

    /// Whether this is the emulated device the bus driver exposes.
    pub fn is_emulated(&self) -> bool {
        self.vendor_id == EMULATED_VENDOR_ID && self.product_id == EMULATED_PRODUCT_ID
    }

    /// The deny-list entries that hide this device.
    fn deny_paths(&self) -> impl Iterator<Item = &str> {
        [self.instance_path.as_str(), self.container_path.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
    }
}

/// Normalized form for comparing driver paths.
fn normalize(path: &str) -> String {
    path.trim().replace('/', "\\").to_lowercase()
}

fn contains_path(list: &[String], path: &str) -> bool {
    let wanted = normalize(path);
    list.iter().any(|p| normalize(p) == wanted)
}

/// Closes the driver handle on drop.
struct Bracket<'a> {
    driver: &'a mut Box<dyn FilterDriver + Send>,
}

impl<'a> Bracket<'a> {
    fn open(driver: &'a mut Box<dyn FilterDriver + Send>) -> Option<Self> {
        match driver.open() {
            Ok(()) => Some(Self { driver }),
            Err(e) => {
                tracing::error!("Couldn't open device filter driver: {e}");
                None
            }
        }
    }
}

impl Drop for Bracket<'_> {
    fn drop(&mut self) {
        self.driver.close();
    }
}

impl std::ops::Deref for Bracket<'_> {
    type Target = Box<dyn FilterDriver + Send>;
    fn deref(&self) -> &Self::Target {
        self.driver
    }
}

impl std::ops::DerefMut for Bracket<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.driver
    }
}

/// Hides and shows gaming devices through the filtering driver.
pub struct DeviceVisibilityController {
    driver: Box<dyn FilterDriver + Send>,
    enumerator: Box<dyn HidEnumerator + Send>,
    devices: Vec<DeviceVisibilityEntry>,
    deny_list: Vec<String>,
    active: bool,
}

impl DeviceVisibilityController {
    pub fn new(
        driver: Box<dyn FilterDriver + Send>,
        enumerator: Box<dyn HidEnumerator + Send>,
    ) -> Self {
        Self {
            driver,
            enumerator,
            devices: Vec::new(),
            deny_list: Vec::new(),
            active: false,
        }
    }

    /// Adds `allow_executables` (and the host platform executables) to the
    /// allow-list, denies every gaming-class device except the emulated
    /// one, and turns filtering on iff `hide`.
    pub fn apply(&mut self, allow_executables: &[String], hide: bool) {
        let Some(mut driver) = Bracket::open(&mut self.driver) else {
            return;
        };

        // Filtering hides devices from this process too.
        match driver.active() {
            Ok(true) => {
                if let Err(e) = driver.set_active(false) {
                    tracing::warn!("Couldn't pause device filtering: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Couldn't read device filter state: {e}"),
        }

        let mut executables = self.enumerator.host_executables();
        executables.extend(allow_executables.iter().cloned());
        match driver.allow_list() {
            Ok(mut allow) => {
                for exe in &executables {
                    let Some(path) = driver.driver_path(exe) else {
                        tracing::warn!("Couldn't resolve {exe} for the allow-list");
                        continue;
                    };
                    if !contains_path(&allow, &path) {
                        tracing::debug!("Allowing {path}");
                        allow.push(path);
                    }
                }
                if let Err(e) = driver.set_allow_list(&allow) {
                    tracing::error!("Couldn't write allow-list: {e}");
                }
            }
            Err(e) => tracing::error!("Couldn't read allow-list: {e}"),
        }

        let devices = self.enumerator.devices();
        match driver.deny_list() {
            Ok(mut deny) => {
                for device in devices.iter().filter(|d| d.is_gaming_class()) {
                    if device.is_emulated() {
                        continue;
                    }
                    for path in device.deny_paths() {
                        if !contains_path(&deny, path) {
                            tracing::debug!("Hiding device {} ({path})", device.name);
                            deny.push(path.to_string());
                        }
                    }
                }
                if let Err(e) = driver.set_deny_list(&deny) {
                    tracing::error!("Couldn't write deny-list: {e}");
                }
                self.deny_list = deny;
            }
            Err(e) => tracing::error!("Couldn't read deny-list: {e}"),
        }

        match driver.set_active(hide) {
            Ok(()) => {
                self.active = hide;
                tracing::info!("Device filtering {}", if hide { "enabled" } else { "disabled" });
            }
            Err(e) => tracing::error!("Couldn't set device filtering: {e}"),
        }
        drop(driver);

        self.devices = self.mark_hidden(devices);
    }

    /// Turns filtering off. Runs at exit and from the watchdog, so it
    /// depends on nothing but the driver.
    pub fn teardown(&mut self) {
        let Some(mut driver) = Bracket::open(&mut self.driver) else {
            return;
        };
        match driver.set_active(false) {
            Ok(()) => {
                self.active = false;
                tracing::info!("Device filtering disabled");
            }
            Err(e) => tracing::error!("Couldn't disable device filtering: {e}"),
        }
    }

    /// Re-reads the device list and the deny-list.
    pub fn refresh(&mut self) {
        let Some(mut driver) = Bracket::open(&mut self.driver) else {
            return;
        };
        let was_active = driver.active().unwrap_or(false);
        if was_active && let Err(e) = driver.set_active(false) {
            tracing::warn!("Couldn't pause device filtering: {e}");
        }

        let devices = self.enumerator.devices();
        match driver.deny_list() {
            Ok(deny) => self.deny_list = deny,
            Err(e) => tracing::error!("Couldn't read deny-list: {e}"),
        }

        if was_active && let Err(e) = driver.set_active(true) {
            tracing::error!("Couldn't resume device filtering: {e}");
        }
        self.active = was_active;
        drop(driver);

        self.devices = self.mark_hidden(devices);
    }

    /// Adds or removes one device on the deny-list.
    pub fn set_device_hidden(&mut self, instance_path: &str, hidden: bool) {
        let Some(device) = self
            .devices
            .iter()
            .find(|d| d.instance_path.eq_ignore_ascii_case(instance_path))
            .cloned()
        else {
            tracing::warn!("Unknown device {instance_path}");
            return;
        };
        let Some(mut driver) = Bracket::open(&mut self.driver) else {
            return;
        };
        let mut deny = match driver.deny_list() {
            Ok(deny) => deny,
            Err(e) => {
                tracing::error!("Couldn't read deny-list: {e}");
                return;
            }
        };

        if hidden {
            for path in device.deny_paths() {
                if !contains_path(&deny, path) {
                    deny.push(path.to_string());
                }
            }
        } else {
            let paths: Vec<String> = device.deny_paths().map(normalize).collect();
            deny.retain(|p| !paths.contains(&normalize(p)));
        }

        match driver.set_deny_list(&deny) {
            Ok(()) => {
                tracing::info!("{} device {}", if hidden { "Hid" } else { "Unhid" }, device.name);
                self.deny_list = deny;
            }
            Err(e) => tracing::error!("Couldn't write deny-list: {e}"),
        }
        drop(driver);

        let devices = std::mem::take(&mut self.devices);
        self.devices = self.mark_hidden(devices);
    }

    /// Flips filtering.
    pub fn set_active(&mut self, active: bool) {
        let Some(mut driver) = Bracket::open(&mut self.driver) else {
            return;
        };
        match driver.set_active(active) {
            Ok(()) => self.active = active,
            Err(e) => tracing::error!("Couldn't set device filtering: {e}"),
        }
    }

    /// Devices as of the last apply or refresh.
    pub fn devices(&self) -> &[DeviceVisibilityEntry] {
        &self.devices
    }

    /// Deny-list as of the last read.
    pub fn deny_list(&self) -> &[String] {
        &self.deny_list
    }

    /// Filtering state as of the last call that touched it.
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn mark_hidden(&self, mut devices: Vec<DeviceVisibilityEntry>) -> Vec<DeviceVisibilityEntry> {
        for device in &mut devices {
            device.hidden = contains_path(&self.deny_list, &device.instance_path);
        }
        devices
    }
}

#[cfg(test)]
mod tests;
