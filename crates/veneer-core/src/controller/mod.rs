//! Virtual controller bridge.
//!
//! Mirrors every connected real gamepad onto an emulated device on the
//! virtual-gamepad bus, one slot per real input index. The bridge runs on
//! its own thread at a fixed period and plugs or unplugs emulated devices
//! as real ones come and go.

pub mod report;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{Config, MAX_SLOTS};
use crate::error::{DriverError, DriverResult};

pub use report::{Ds4Report, PadReport, PadState, Rumble};

/// Vendor id of the emulated-gamepad identity.
pub const EMULATED_VENDOR_ID: u16 = 0x28DE;
/// Product id of the emulated-gamepad identity.
pub const EMULATED_PRODUCT_ID: u16 = 0x11FF;

/// Delay before the first pass, so the host platform can finish hooking
/// the input subsystem.
pub const SETTLE_DELAY: Duration = Duration::from_millis(2000);
/// Sleep after each full pass over the slots.
pub const LOOP_INTERVAL: Duration = Duration::from_millis(1);

/// Report layout of an emulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileKind {
    /// Xbox 360 style pad; same layout as the real input subsystem.
    #[default]
    StandardPad,
    /// DualShock 4 style pad.
    AlternatePad,
}

impl ProfileKind {
    pub fn from_alternate(alternate: bool) -> Self {
        if alternate {
            Self::AlternatePad
        } else {
            Self::StandardPad
        }
    }

    /// The ids a retail device of this profile reports.
    pub fn stock_ids(self) -> DeviceIds {
        match self {
            Self::StandardPad => DeviceIds::new(0x045E, 0x028E),
            Self::AlternatePad => DeviceIds::new(0x054C, 0x05C4),
        }
    }
}

/// Vendor/product pair of an emulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIds {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIds {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// The emulated-gamepad identity. It is neither a real device's ids nor
    /// the host platform's own controller ids, so the platform neither
    /// re-wraps the device nor counts it twice.
    pub const fn emulated() -> Self {
        Self::new(EMULATED_VENDOR_ID, EMULATED_PRODUCT_ID)
    }

    /// Ids for a new device of `profile`.
    pub fn for_profile(profile: ProfileKind, use_real_ids: bool) -> Self {
        if use_real_ids {
            profile.stock_ids()
        } else {
            Self::emulated()
        }
    }
}

/// One emulated device slot. `target` is `Some` exactly while an emulated
/// device is attached on the bus; its ids are fixed for that attachment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerSlot {
    pub target: Option<AttachedTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachedTarget {
    pub profile: ProfileKind,
    pub ids: DeviceIds,
}

impl ControllerSlot {
    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }
}

/// Reads the real gamepads.
pub trait InputSource {
    /// Polls real index `index`. `None` when nothing is connected there.
    fn poll(&mut self, index: usize) -> Option<PadState>;

    /// Sets motor speeds on real index `index`.
    fn set_rumble(&mut self, index: usize, large: u16, small: u16);
}

/// The virtual-gamepad bus, addressed by slot.
pub trait GamepadBus {
    /// Creates a detached target for `slot`, replacing any previous one.
    fn allocate(&mut self, slot: usize, profile: ProfileKind, ids: DeviceIds) -> DriverResult<()>;

    /// Plugs the allocated target in and registers for notifications.
    fn add(&mut self, slot: usize) -> DriverResult<()>;

    /// Unplugs and frees the target of `slot`.
    fn remove(&mut self, slot: usize) -> DriverResult<()>;

    fn submit(&mut self, slot: usize, report: &PadReport) -> DriverResult<()>;

    /// Takes the latest force-feedback request for `slot`, if any.
    fn take_rumble(&mut self, slot: usize) -> Option<Rumble>;
}

/// Bridge settings that may change while the loop runs.
#[derive(Debug)]
pub struct BridgeSettings {
    max_slots: AtomicUsize,
    alternate_profile: AtomicBool,
    real_ids: AtomicBool,
    rumble: AtomicBool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            max_slots: AtomicUsize::new(1),
            alternate_profile: AtomicBool::new(false),
            real_ids: AtomicBool::new(false),
            rumble: AtomicBool::new(true),
        }
    }
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_slots: AtomicUsize::new(config.max_slots()),
            alternate_profile: AtomicBool::new(config.controller.emulate_alternate_profile),
            real_ids: AtomicBool::new(config.devices.use_real_vendor_product_ids),
            rumble: AtomicBool::new(true),
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots.load(Ordering::Relaxed)
    }

    /// Clamped to the number of slots the input subsystem exposes.
    pub fn set_max_slots(&self, slots: usize) {
        self.max_slots
            .store(slots.min(MAX_SLOTS as usize), Ordering::Relaxed);
    }

    pub fn profile(&self) -> ProfileKind {
        ProfileKind::from_alternate(self.alternate_profile.load(Ordering::Relaxed))
    }

    pub fn set_profile(&self, profile: ProfileKind) {
        self.alternate_profile
            .store(profile == ProfileKind::AlternatePad, Ordering::Relaxed);
    }

    pub fn use_real_ids(&self) -> bool {
        self.real_ids.load(Ordering::Relaxed)
    }

    pub fn set_use_real_ids(&self, value: bool) {
        self.real_ids.store(value, Ordering::Relaxed);
    }

    pub fn rumble_enabled(&self) -> bool {
        self.rumble.load(Ordering::Relaxed)
    }

    pub fn set_rumble_enabled(&self, value: bool) {
        self.rumble.store(value, Ordering::Relaxed);
    }
}

type Bus = Box<dyn GamepadBus + Send>;
type Input = Box<dyn InputSource + Send>;

/// State and body of the bridge loop. One [`BridgeLoop::tick`] is one full
/// pass over all slots.
pub struct BridgeLoop {
    bus: Bus,
    input: Input,
    settings: Arc<BridgeSettings>,
    slots: [ControllerSlot; MAX_SLOTS as usize],
    profile: ProfileKind,
}

impl BridgeLoop {
    pub fn new(bus: Bus, input: Input, settings: Arc<BridgeSettings>) -> Self {
        let profile = settings.profile();
        Self {
            bus,
            input,
            settings,
            slots: Default::default(),
            profile,
        }
    }

    pub fn tick(&mut self) {
        let profile = self.settings.profile();
        if profile != self.profile {
            // Profiles can't change on a live target.
            tracing::info!("Controller profile changed to {profile:?}; unplugging all controllers");
            self.unplug_all();
            self.profile = profile;
        }

        let max_slots = self.settings.max_slots();
        for index in 0..self.slots.len() {
            if index >= max_slots {
                if self.slots[index].is_attached() {
                    self.unplug(index);
                }
                continue;
            }

            match self.input.poll(index) {
                None => {
                    if self.slots[index].is_attached() {
                        self.unplug(index);
                    }
                }
                Some(_) if !self.slots[index].is_attached() => self.plug(index),
                Some(state) => {
                    let report = PadReport::for_profile(self.profile, &state);
                    if let Err(e) = self.bus.submit(index, &report) {
                        tracing::trace!("Report for controller {index} failed: {e}");
                    }
                    self.forward_rumble(index);
                }
            }
        }
    }

    /// Unplugs every attached slot.
    pub fn unplug_all(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].is_attached() {
                self.unplug(index);
            }
        }
    }

    /// Number of attached emulated devices.
    pub fn attached(&self) -> usize {
        self.slots.iter().filter(|s| s.is_attached()).count()
    }

    pub fn slots(&self) -> &[ControllerSlot] {
        &self.slots
    }

    fn plug(&mut self, index: usize) {
        let profile = self.profile;
        let ids = DeviceIds::for_profile(profile, self.settings.use_real_ids());

        let mut result = self.bus.allocate(index, profile, ids);
        if result.is_ok() {
            result = self.bus.add(index);
        }
        if result == Err(DriverError::TargetUninitialized) {
            tracing::warn!("Controller {index} target uninitialized; reallocating");
            result = self
                .bus
                .allocate(index, profile, ids)
                .and_then(|()| self.bus.add(index));
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    "Plugged in controller {index} ({profile:?}, {:04x}:{:04x})",
                    ids.vendor_id,
                    ids.product_id
                );
                self.slots[index].target = Some(AttachedTarget { profile, ids });
            }
            Err(e) => tracing::error!("Failed to plug in controller {index}: {e}"),
        }
    }

    fn unplug(&mut self, index: usize) {
        match self.bus.remove(index) {
            Ok(()) => tracing::info!("Unplugged controller {index}"),
            Err(e) => tracing::warn!("Unplugging controller {index} failed: {e}"),
        }
        self.slots[index].target = None;
    }

    fn forward_rumble(&mut self, index: usize) {
        let Some(rumble) = self.bus.take_rumble(index) else {
            return;
        };
        if !self.settings.rumble_enabled() {
            return;
        }
        let (large, small) = rumble.motor_speeds();
        self.input.set_rumble(index, large, small);
    }
}

/// Owns the bridge thread.
pub struct VirtualControllerBridge {
    settings: Arc<BridgeSettings>,
    run: Arc<AtomicBool>,
    idle: Option<BridgeLoop>,
    thread: Option<JoinHandle<BridgeLoop>>,
    settle_delay: Duration,
}

impl VirtualControllerBridge {
    pub fn new(bus: Bus, input: Input, settings: Arc<BridgeSettings>) -> Self {
        Self {
            idle: Some(BridgeLoop::new(bus, input, Arc::clone(&settings))),
            settings,
            run: Arc::new(AtomicBool::new(false)),
            thread: None,
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn settings(&self) -> &Arc<BridgeSettings> {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Spawns the bridge loop. No-op when already running.
    pub fn start(&mut self) {
        let Some(mut bridge) = self.idle.take() else {
            return;
        };
        self.run.store(true, Ordering::SeqCst);
        let run = Arc::clone(&self.run);
        let settle_delay = self.settle_delay;

        let spawned = std::thread::Builder::new()
            .name("controller-bridge".into())
            .spawn(move || {
                let started = Instant::now();
                while run.load(Ordering::SeqCst) && started.elapsed() < settle_delay {
                    std::thread::sleep(Duration::from_millis(20));
                }
                tracing::debug!("Controller bridge running");
                while run.load(Ordering::SeqCst) {
                    bridge.tick();
                    std::thread::sleep(LOOP_INTERVAL);
                }
                bridge
            });

        match spawned {
            Ok(handle) => self.thread = Some(handle),
            Err(e) => tracing::error!("Failed to spawn controller bridge: {e}"),
        }
    }

    /// Stops the loop, joins it, then unplugs every attached slot.
    pub fn stop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(bridge) => self.idle = Some(bridge),
                Err(_) => tracing::error!("Controller bridge thread panicked"),
            }
        }
        if let Some(bridge) = self.idle.as_mut() {
            bridge.unplug_all();
        }
        tracing::debug!("Controller bridge stopped");
    }
}

impl Drop for VirtualControllerBridge {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests;
