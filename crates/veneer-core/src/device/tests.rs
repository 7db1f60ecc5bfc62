use std::sync::{Arc, Mutex};

use super::*;
use crate::error::DriverError;

#[derive(Default)]
struct DriverState {
    open: bool,
    opens: usize,
    closes: usize,
    allow: Vec<String>,
    deny: Vec<String>,
    active: bool,
    fail_open: bool,
    fail_set_active: bool,
}

#[derive(Clone, Default)]
struct FakeDriver(Arc<Mutex<DriverState>>);

impl FakeDriver {
    fn state(&self) -> std::sync::MutexGuard<'_, DriverState> {
        self.0.lock().unwrap()
    }

    fn require_open(&self) -> DriverResult<()> {
        if self.state().open {
            Ok(())
        } else {
            Err(DriverError::OpenFailed("handle not open".into()))
        }
    }
}

impl FilterDriver for FakeDriver {
    fn open(&mut self) -> DriverResult<()> {
        let mut state = self.state();
        if state.fail_open {
            return Err(DriverError::NotInstalled("HidHide".into()));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state();
        state.open = false;
        state.closes += 1;
    }

    fn allow_list(&mut self) -> DriverResult<Vec<String>> {
        self.require_open()?;
        Ok(self.state().allow.clone())
    }

    fn set_allow_list(&mut self, list: &[String]) -> DriverResult<()> {
        self.require_open()?;
        self.state().allow = list.to_vec();
        Ok(())
    }

    fn deny_list(&mut self) -> DriverResult<Vec<String>> {
        self.require_open()?;
        Ok(self.state().deny.clone())
    }

    fn set_deny_list(&mut self, list: &[String]) -> DriverResult<()> {
        self.require_open()?;
        self.state().deny = list.to_vec();
        Ok(())
    }

    fn active(&mut self) -> DriverResult<bool> {
        self.require_open()?;
        Ok(self.state().active)
    }

    fn set_active(&mut self, active: bool) -> DriverResult<()> {
        self.require_open()?;
        let mut state = self.state();
        if state.fail_set_active {
            return Err(DriverError::RequestFailed {
                code: 0x8001_E014,
                reason: "denied".into(),
            });
        }
        state.active = active;
        Ok(())
    }
}

/// Records the driver's active flag at enumeration time.
struct FakeEnumerator {
    driver: FakeDriver,
    devices: Vec<DeviceVisibilityEntry>,
    seen_active: Arc<Mutex<Vec<bool>>>,
}

impl HidEnumerator for FakeEnumerator {
    fn devices(&mut self) -> Vec<DeviceVisibilityEntry> {
        let active = self.driver.state().active;
        self.seen_active.lock().unwrap().push(active);
        self.devices.clone()
    }

    fn host_executables(&mut self) -> Vec<String> {
        vec![r"C:\Steam\steam.exe".into()]
    }
}

fn device(instance: &str, container: &str, page: u16, usage: u16, vid: u16, pid: u16) -> DeviceVisibilityEntry {
    DeviceVisibilityEntry {
        name: instance.into(),
        instance_path: instance.into(),
        container_path: container.into(),
        vendor_id: vid,
        product_id: pid,
        usage_page: page,
        usage,
        ..Default::default()
    }
}

fn sample_devices() -> Vec<DeviceVisibilityEntry> {
    vec![
        device(r"HID\VID_054C&PID_05C4\1", r"USB\VID_054C&PID_05C4\A", 0x01, 0x05, 0x054C, 0x05C4),
        device(r"HID\VID_046D&PID_C52B\2", r"USB\VID_046D&PID_C52B\B", 0x01, 0x02, 0x046D, 0xC52B),
        device(r"HID\VID_28DE&PID_11FF\3", r"USB\VID_28DE&PID_11FF\C", 0x01, 0x05, 0x28DE, 0x11FF),
        device(r"HID\VID_044F&PID_B10A\4", "", 0x05, 0x00, 0x044F, 0xB10A),
    ]
}

fn controller(driver: &FakeDriver) -> (DeviceVisibilityController, Arc<Mutex<Vec<bool>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let enumerator = FakeEnumerator {
        driver: driver.clone(),
        devices: sample_devices(),
        seen_active: Arc::clone(&seen),
    };
    (
        DeviceVisibilityController::new(Box::new(driver.clone()), Box::new(enumerator)),
        seen,
    )
}

#[test]
fn gaming_class_is_decided_by_usage() {
    // Act / Assert
    let devices = sample_devices();
    assert!(devices[0].is_gaming_class());
    assert!(!devices[1].is_gaming_class());
    assert!(devices[3].is_gaming_class());
    assert!(devices[2].is_emulated());
}

#[test]
fn apply_denies_gaming_devices_except_the_emulated_one() {
    // Arrange
    let driver = FakeDriver::default();
    let (mut devices, _) = controller(&driver);

    // Act
    devices.apply(&[], true);

    // Assert
    let state = driver.state();
    assert_eq!(
        state.deny,
        vec![
            r"HID\VID_054C&PID_05C4\1",
            r"USB\VID_054C&PID_05C4\A",
            r"HID\VID_044F&PID_B10A\4",
        ]
    );
    assert!(state.active);
    assert!(!state.open);
}

#[test]
fn apply_lifts_filtering_while_enumerating() {
    // Arrange
    let driver = FakeDriver::default();
    driver.state().active = true;
    let (mut devices, seen) = controller(&driver);

    // Act
    devices.apply(&[], true);

    // Assert
    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert!(driver.state().active);
}

#[test]
fn apply_merges_allow_list_case_insensitively() {
    // Arrange
    let driver = FakeDriver::default();
    driver.state().allow = vec![r"c:\steam\STEAM.EXE".into(), r"D:\Other\tool.exe".into()];
    let (mut devices, _) = controller(&driver);

    // Act
    devices.apply(&[r"C:/Games/game.exe".to_string()], true);

    // Assert
    assert_eq!(
        driver.state().allow,
        vec![
            r"c:\steam\STEAM.EXE",
            r"D:\Other\tool.exe",
            r"C:/Games/game.exe",
        ]
    );
}

#[test]
fn apply_then_unhide_keeps_deny_list_and_clears_active() {
    // Arrange
    let driver = FakeDriver::default();
    let (mut devices, _) = controller(&driver);
    let list = vec![r"C:\Games\game.exe".to_string()];
    devices.apply(&list, true);
    let deny_after_hide = driver.state().deny.clone();

    // Act
    devices.apply(&list, false);

    // Assert
    let state = driver.state();
    assert_eq!(state.deny, deny_after_hide);
    assert!(!state.active);
    assert!(!devices.is_active());
}

#[test]
fn existing_deny_entries_are_not_duplicated() {
    // Arrange
    let driver = FakeDriver::default();
    driver.state().deny = vec![r"hid\vid_054c&pid_05c4\1".into()];
    let (mut devices, _) = controller(&driver);

    // Act
    devices.apply(&[], true);

    // Assert
    assert_eq!(driver.state().deny.len(), 3);
}

#[test]
fn missing_driver_is_a_logged_no_op() {
    // Arrange
    let driver = FakeDriver::default();
    driver.state().fail_open = true;
    let (mut devices, seen) = controller(&driver);

    // Act
    devices.apply(&[], true);
    devices.teardown();

    // Assert
    assert!(seen.lock().unwrap().is_empty());
    assert!(driver.state().deny.is_empty());
    assert_eq!(driver.state().closes, 0);
}

#[test]
fn teardown_forces_filtering_off() {
    // Arrange
    let driver = FakeDriver::default();
    driver.state().active = true;
    let (mut devices, _) = controller(&driver);

    // Act
    devices.teardown();

    // Assert
    let state = driver.state();
    assert!(!state.active);
    assert_eq!(state.opens, 1);
    assert_eq!(state.closes, 1);
}

#[test]
fn handle_is_closed_even_when_requests_fail() {
    // Arrange
    let driver = FakeDriver::default();
    driver.state().fail_set_active = true;
    let (mut devices, _) = controller(&driver);

    // Act
    devices.apply(&[], true);

    // Assert
    let state = driver.state();
    assert!(!state.open);
    assert_eq!(state.opens, state.closes);
}

#[test]
fn refresh_restores_previous_active_flag() {
    // Arrange
    let driver = FakeDriver::default();
    let (mut devices, seen) = controller(&driver);
    devices.apply(&[], true);

    // Act
    devices.refresh();

    // Assert
    assert_eq!(*seen.lock().unwrap(), vec![false, false]);
    assert!(driver.state().active);
    assert!(devices.is_active());
    let hidden: Vec<_> = devices.devices().iter().filter(|d| d.hidden).map(|d| d.vendor_id).collect();
    assert_eq!(hidden, vec![0x054C, 0x044F]);
}

#[test]
fn set_device_hidden_adds_and_removes_both_paths() {
    // Arrange
    let driver = FakeDriver::default();
    let (mut devices, _) = controller(&driver);
    devices.refresh();

    // Act
    devices.set_device_hidden(r"HID\VID_054C&PID_05C4\1", true);

    // Assert
    assert_eq!(driver.state().deny.len(), 2);
    assert!(devices.devices()[0].hidden);

    // Act
    devices.set_device_hidden(r"HID\VID_054C&PID_05C4\1", false);

    // Assert
    assert!(driver.state().deny.is_empty());
    assert!(!devices.devices()[0].hidden);
}

#[test]
fn set_active_flips_filtering() {
    // Arrange
    let driver = FakeDriver::default();
    let (mut devices, _) = controller(&driver);

    // Act
    devices.set_active(true);

    // Assert
    assert!(driver.state().active);
    assert!(devices.is_active());
}
