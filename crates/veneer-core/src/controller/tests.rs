use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;

use super::*;
use crate::log::DiagnosticLog;

#[derive(Debug, Clone, PartialEq)]
enum BusCall {
    Allocate(usize, ProfileKind, DeviceIds),
    Add(usize),
    Remove(usize),
    Submit(usize),
}

#[derive(Default)]
struct BusState {
    live: [bool; 4],
    calls: Vec<BusCall>,
    add_errors: VecDeque<DriverError>,
    rumble: [Option<Rumble>; 4],
}

#[derive(Clone, Default)]
struct FakeBus(Arc<Mutex<BusState>>);

impl FakeBus {
    fn live(&self) -> usize {
        self.0.lock().unwrap().live.iter().filter(|l| **l).count()
    }

    fn calls(&self) -> Vec<BusCall> {
        self.0.lock().unwrap().calls.clone()
    }
}

impl GamepadBus for FakeBus {
    fn allocate(&mut self, slot: usize, profile: ProfileKind, ids: DeviceIds) -> DriverResult<()> {
        self.0
            .lock()
            .unwrap()
            .calls
            .push(BusCall::Allocate(slot, profile, ids));
        Ok(())
    }

    fn add(&mut self, slot: usize) -> DriverResult<()> {
        let mut state = self.0.lock().unwrap();
        state.calls.push(BusCall::Add(slot));
        if let Some(e) = state.add_errors.pop_front() {
            return Err(e);
        }
        state.live[slot] = true;
        Ok(())
    }

    fn remove(&mut self, slot: usize) -> DriverResult<()> {
        let mut state = self.0.lock().unwrap();
        state.calls.push(BusCall::Remove(slot));
        state.live[slot] = false;
        Ok(())
    }

    fn submit(&mut self, slot: usize, _report: &PadReport) -> DriverResult<()> {
        self.0.lock().unwrap().calls.push(BusCall::Submit(slot));
        Ok(())
    }

    fn take_rumble(&mut self, slot: usize) -> Option<Rumble> {
        self.0.lock().unwrap().rumble[slot].take()
    }
}

#[derive(Default)]
struct InputState {
    connected: [bool; 4],
    rumble: Vec<(usize, u16, u16)>,
}

#[derive(Clone, Default)]
struct FakeInput(Arc<Mutex<InputState>>);

impl FakeInput {
    fn connect(&self, indices: &[usize]) {
        let mut state = self.0.lock().unwrap();
        state.connected = [false; 4];
        for &i in indices {
            state.connected[i] = true;
        }
    }
}

impl InputSource for FakeInput {
    fn poll(&mut self, index: usize) -> Option<PadState> {
        self.0.lock().unwrap().connected[index].then(PadState::default)
    }

    fn set_rumble(&mut self, index: usize, large: u16, small: u16) {
        self.0.lock().unwrap().rumble.push((index, large, small));
    }
}

fn bridge_loop(max_slots: usize) -> (BridgeLoop, FakeBus, FakeInput, Arc<BridgeSettings>) {
    let bus = FakeBus::default();
    let input = FakeInput::default();
    let settings = Arc::new(BridgeSettings::default());
    settings.set_max_slots(max_slots);
    let bridge = BridgeLoop::new(
        Box::new(bus.clone()),
        Box::new(input.clone()),
        Arc::clone(&settings),
    );
    (bridge, bus, input, settings)
}

#[test]
fn two_connected_then_none_plugs_and_unplugs_with_log_entries() {
    // Arrange
    let mut config = Config::default();
    config.controller.max_slots = 2;
    config.controller.emulate_alternate_profile = false;
    config.finalize();
    let bus = FakeBus::default();
    let input = FakeInput::default();
    let mut bridge = BridgeLoop::new(
        Box::new(bus.clone()),
        Box::new(input.clone()),
        Arc::new(BridgeSettings::from_config(&config)),
    );
    let log = DiagnosticLog::new(32, Duration::from_secs(60));
    let subscriber = tracing_subscriber::registry().with(log.layer());

    // Act / Assert
    tracing::subscriber::with_default(subscriber, || {
        input.connect(&[0, 1]);
        bridge.tick();
        assert_eq!(bus.live(), 2);
        assert_eq!(bridge.attached(), 2);

        input.connect(&[]);
        bridge.tick();
        assert_eq!(bus.live(), 0);
        assert_eq!(bridge.attached(), 0);
    });

    let messages: Vec<_> = log.recent().into_iter().map(|e| e.message).collect();
    assert!(messages.iter().any(|m| m == "Unplugged controller 0"));
    assert!(messages.iter().any(|m| m == "Unplugged controller 1"));
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.starts_with("Plugged in controller"))
            .count(),
        2
    );
}

#[test]
fn live_devices_converge_to_max_slots() {
    // Arrange
    let (mut bridge, bus, input, settings) = bridge_loop(4);
    input.connect(&[0, 1, 2, 3]);
    bridge.tick();
    assert_eq!(bus.live(), 4);

    // Act
    settings.set_max_slots(1);
    bridge.tick();

    // Assert
    assert_eq!(bus.live(), 1);
    assert!(bridge.slots()[0].is_attached());

    // Act
    settings.set_max_slots(3);
    bridge.tick();

    // Assert
    assert_eq!(bus.live(), 3);
}

#[test]
fn max_slots_never_exceeds_connected_indices() {
    // Arrange
    let (mut bridge, bus, input, _settings) = bridge_loop(2);
    input.connect(&[0, 1, 2, 3]);

    // Act
    bridge.tick();

    // Assert
    assert_eq!(bus.live(), 2);
    assert!(!bridge.slots()[2].is_attached());
}

#[test]
fn profile_toggle_unplugs_everything_before_replugging() {
    // Arrange
    let (mut bridge, bus, input, settings) = bridge_loop(2);
    input.connect(&[0, 1]);
    bridge.tick();

    // Act
    settings.set_profile(ProfileKind::AlternatePad);
    bridge.tick();

    // Assert
    let calls = bus.calls();
    let first_remove = calls
        .iter()
        .position(|c| matches!(c, BusCall::Remove(_)))
        .unwrap();
    let last_remove = calls
        .iter()
        .rposition(|c| matches!(c, BusCall::Remove(_)))
        .unwrap();
    let replug = calls
        .iter()
        .position(|c| matches!(c, BusCall::Allocate(_, ProfileKind::AlternatePad, _)))
        .unwrap();
    assert!(first_remove < replug);
    assert!(last_remove < replug);
    assert!(
        bridge
            .slots()
            .iter()
            .flat_map(|s| s.target)
            .all(|t| t.profile == ProfileKind::AlternatePad)
    );
    assert_eq!(bus.live(), 2);
}

#[test]
fn uninitialized_target_is_reallocated_once() {
    // Arrange
    let (mut bridge, bus, input, _settings) = bridge_loop(1);
    bus.0
        .lock()
        .unwrap()
        .add_errors
        .push_back(DriverError::TargetUninitialized);
    input.connect(&[0]);

    // Act
    bridge.tick();

    // Assert
    let allocations = bus
        .calls()
        .iter()
        .filter(|c| matches!(c, BusCall::Allocate(..)))
        .count();
    assert_eq!(allocations, 2);
    assert!(bridge.slots()[0].is_attached());
}

#[test]
fn repeated_add_failure_gives_up_after_one_retry() {
    // Arrange
    let (mut bridge, bus, input, _settings) = bridge_loop(1);
    {
        let mut state = bus.0.lock().unwrap();
        state.add_errors.push_back(DriverError::TargetUninitialized);
        state.add_errors.push_back(DriverError::TargetUninitialized);
    }
    input.connect(&[0]);

    // Act
    bridge.tick();

    // Assert
    let adds = bus
        .calls()
        .iter()
        .filter(|c| matches!(c, BusCall::Add(_)))
        .count();
    assert_eq!(adds, 2);
    assert!(!bridge.slots()[0].is_attached());
}

#[test]
fn default_identity_is_the_emulated_signature() {
    // Arrange
    let (mut bridge, bus, input, settings) = bridge_loop(2);
    input.connect(&[0]);

    // Act
    bridge.tick();
    settings.set_use_real_ids(true);
    input.connect(&[0, 1]);
    bridge.tick();

    // Assert
    let calls = bus.calls();
    assert!(calls.contains(&BusCall::Allocate(
        0,
        ProfileKind::StandardPad,
        DeviceIds::new(EMULATED_VENDOR_ID, EMULATED_PRODUCT_ID)
    )));
    assert!(calls.contains(&BusCall::Allocate(
        1,
        ProfileKind::StandardPad,
        DeviceIds::new(0x045E, 0x028E)
    )));
}

#[test]
fn connected_slot_forwards_reports() {
    // Arrange
    let (mut bridge, bus, input, _settings) = bridge_loop(1);
    input.connect(&[0]);
    bridge.tick();

    // Act
    bridge.tick();

    // Assert
    assert!(bus.calls().contains(&BusCall::Submit(0)));
}

#[test]
fn rumble_is_routed_to_the_real_index_when_enabled() {
    // Arrange
    let (mut bridge, bus, input, settings) = bridge_loop(2);
    input.connect(&[0, 1]);
    bridge.tick();
    bus.0.lock().unwrap().rumble[1] = Some(Rumble {
        large_motor: 2,
        small_motor: 1,
    });

    // Act
    bridge.tick();

    // Assert
    assert_eq!(input.0.lock().unwrap().rumble, vec![(1, 0x1FE, 0xFF)]);

    // Act
    settings.set_rumble_enabled(false);
    bus.0.lock().unwrap().rumble[0] = Some(Rumble::default());
    bridge.tick();

    // Assert
    assert_eq!(input.0.lock().unwrap().rumble.len(), 1);
}

#[test]
fn stop_unplugs_remaining_slots() {
    // Arrange
    let bus = FakeBus::default();
    let input = FakeInput::default();
    input.connect(&[0]);
    let settings = Arc::new(BridgeSettings::default());
    let mut bridge =
        VirtualControllerBridge::new(Box::new(bus.clone()), Box::new(input), settings)
            .with_settle_delay(Duration::ZERO);

    // Act
    bridge.start();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while bus.live() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    bridge.stop();

    // Assert
    assert!(!bridge.is_running());
    assert_eq!(bus.live(), 0);
    assert!(bus.calls().contains(&BusCall::Remove(0)));
}
