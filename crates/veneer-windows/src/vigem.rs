//! Virtual gamepads on the ViGEm bus.

use std::sync::{Arc, Mutex, PoisonError};

use veneer_core::controller::{DeviceIds, GamepadBus, PadReport, ProfileKind, Rumble};
use veneer_core::{DriverError, DriverResult};
use vigem_client::{
    Client, DS4Report, DualShock4Wired, TargetId, XButtons, XGamepad, XNotification, Xbox360Wired,
};

type RumbleSlots = Arc<Mutex<Vec<Option<Rumble>>>>;

enum Target {
    Standard(Xbox360Wired<Client>),
    Alternate(DualShock4Wired<Client>),
}

/// A target that isn't plugged in (or not yet ready) is the case the
/// bridge retries; a missing bus means the driver isn't installed.
fn driver_error(e: vigem_client::Error) -> DriverError {
    match e {
        vigem_client::Error::TargetNotReady => DriverError::TargetUninitialized,
        vigem_client::Error::BusNotFound => DriverError::NotInstalled("bus not found".into()),
        other => DriverError::Other(format!("{other:?}")),
    }
}

pub struct ViGEmBus {
    client: Client,
    targets: Vec<Option<Target>>,
    rumble: RumbleSlots,
}

// SAFETY: the bus and its targets wrap driver handles that are valid on
// any thread. The bridge moves the bus into its worker and only that
// thread touches it afterwards.
unsafe impl Send for ViGEmBus {}

impl ViGEmBus {
    pub fn connect(slots: usize) -> DriverResult<Self> {
        let client = Client::connect().map_err(|e| DriverError::NotInstalled(format!("{e:?}")))?;
        tracing::info!("Connected to the virtual gamepad bus");
        Ok(Self {
            client,
            targets: (0..slots).map(|_| None).collect(),
            rumble: Arc::new(Mutex::new(vec![None; slots])),
        })
    }

    fn target(&mut self, slot: usize) -> DriverResult<&mut Target> {
        self.targets
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or_else(|| DriverError::Other(format!("no target allocated for slot {slot}")))
    }

    /// Routes the target's force-feedback requests into the slot's mailbox.
    fn listen_for_rumble(&mut self, slot: usize) {
        let rumble = Arc::clone(&self.rumble);
        let Ok(Target::Standard(pad)) = self.target(slot) else {
            // The DS4 target exposes no notification in the client.
            return;
        };
        match pad.request_notification() {
            Ok(request) => {
                request.spawn_thread(move |_, notification: XNotification| {
                    let mut slots = rumble.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(entry) = slots.get_mut(slot) {
                        *entry = Some(Rumble {
                            large_motor: notification.large_motor,
                            small_motor: notification.small_motor,
                        });
                    }
                });
            }
            Err(e) => tracing::warn!("Couldn't subscribe to rumble for controller {slot}: {e:?}"),
        }
    }
}

impl GamepadBus for ViGEmBus {
    fn allocate(&mut self, slot: usize, profile: ProfileKind, ids: DeviceIds) -> DriverResult<()> {
        let client = self
            .client
            .try_clone()
            .map_err(|e| DriverError::OpenFailed(format!("{e:?}")))?;
        let id = TargetId {
            vendor: ids.vendor_id,
            product: ids.product_id,
        };
        let target = match profile {
            ProfileKind::StandardPad => Target::Standard(Xbox360Wired::new(client, id)),
            ProfileKind::AlternatePad => Target::Alternate(DualShock4Wired::new(client, id)),
        };
        if slot >= self.targets.len() {
            self.targets.resize_with(slot + 1, || None);
            self.rumble
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .resize(slot + 1, None);
        }
        self.targets[slot] = Some(target);
        Ok(())
    }

    fn add(&mut self, slot: usize) -> DriverResult<()> {
        match self.target(slot)? {
            Target::Standard(pad) => {
                pad.plugin().map_err(driver_error)?;
                pad.wait_ready().map_err(driver_error)?;
            }
            Target::Alternate(pad) => {
                pad.plugin().map_err(driver_error)?;
                pad.wait_ready().map_err(driver_error)?;
            }
        }
        self.listen_for_rumble(slot);
        Ok(())
    }

    fn remove(&mut self, slot: usize) -> DriverResult<()> {
        let Some(target) = self.targets.get_mut(slot).and_then(Option::take) else {
            return Ok(());
        };
        if let Some(entry) = self
            .rumble
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(slot)
        {
            *entry = None;
        }
        match target {
            Target::Standard(mut pad) => pad.unplug().map_err(driver_error),
            Target::Alternate(mut pad) => pad.unplug().map_err(driver_error),
        }
    }

    fn submit(&mut self, slot: usize, report: &PadReport) -> DriverResult<()> {
        match (self.target(slot)?, report) {
            (Target::Standard(pad), PadReport::Standard(state)) => pad
                .update(&XGamepad {
                    buttons: XButtons(state.buttons),
                    left_trigger: state.left_trigger,
                    right_trigger: state.right_trigger,
                    thumb_lx: state.thumb_lx,
                    thumb_ly: state.thumb_ly,
                    thumb_rx: state.thumb_rx,
                    thumb_ry: state.thumb_ry,
                })
                .map_err(driver_error),
            (Target::Alternate(pad), PadReport::Alternate(report)) => pad
                .update(&DS4Report {
                    thumb_lx: report.thumb_lx,
                    thumb_ly: report.thumb_ly,
                    thumb_rx: report.thumb_rx,
                    thumb_ry: report.thumb_ry,
                    buttons: report.buttons,
                    special: report.special,
                    trigger_l: report.trigger_l,
                    trigger_r: report.trigger_r,
                })
                .map_err(driver_error),
            _ => Err(DriverError::Other(format!(
                "report shape doesn't match the target in slot {slot}"
            ))),
        }
    }

    fn take_rumble(&mut self, slot: usize) -> Option<Rumble> {
        self.rumble
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(slot)
            .and_then(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unready_target_is_the_retryable_error() {
        // Act
        let error = driver_error(vigem_client::Error::TargetNotReady);

        // Assert
        assert_eq!(error, DriverError::TargetUninitialized);
    }

    #[test]
    fn other_bus_errors_keep_their_description() {
        // Act
        let busy = driver_error(vigem_client::Error::NoFreeSlot);
        let missing = driver_error(vigem_client::Error::BusNotFound);

        // Assert
        assert_eq!(busy, DriverError::Other("NoFreeSlot".into()));
        assert!(matches!(missing, DriverError::NotInstalled(_)));
    }
}
