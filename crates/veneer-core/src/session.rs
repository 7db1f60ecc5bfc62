//! One session: every component, constructed at start and torn down at
//! the end.

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::controller::{BridgeSettings, GamepadBus, InputSource, VirtualControllerBridge};
use crate::device::{DeviceVisibilityController, FilterDriver, HidEnumerator};
use crate::error::LaunchResult;
use crate::focus::{FocusArbiter, FocusFlags, FocusMode, ForegroundInterceptor, WindowHandle, WindowSystem};
use crate::ipc::{Command, Response};
use crate::overlay::{DetectorConfig, MessageSource, OverlayPresenceDetector};
use crate::panel::{OverlayElements, Throttle};
use crate::priority::{PriorityClass, PriorityControl, ProcessPriority};
use crate::process::{ProcessHost, ProcessSupervisor, SharedPids};

/// How often the device panel re-enumerates while focused.
pub const DEVICE_PANEL_REFRESH: Duration = Duration::from_secs(5);

type InterceptorFactory = Box<dyn FnOnce(Arc<FocusFlags>) -> Box<dyn ForegroundInterceptor>>;

/// Platform implementations of every seam a session needs.
pub struct Platform {
    pub own_window: WindowHandle,
    pub filter_driver: Box<dyn FilterDriver + Send>,
    pub hid: Box<dyn HidEnumerator + Send>,
    /// `None` when the virtual-gamepad bus isn't available.
    pub gamepad: Option<(Box<dyn GamepadBus + Send>, Box<dyn InputSource + Send>)>,
    pub processes: Box<dyn ProcessHost + Send>,
    pub messages: Box<dyn MessageSource>,
    pub windows: Box<dyn WindowSystem>,
    pub priority: Box<dyn PriorityClass + Send>,
    /// Builds the foreground interception once the flags it reads exist.
    pub interceptor: InterceptorFactory,
}

pub struct Session {
    config: Config,
    devices: Rc<RefCell<DeviceVisibilityController>>,
    bridge: Option<VirtualControllerBridge>,
    supervisor: ProcessSupervisor,
    detector: OverlayPresenceDetector,
    focus: FocusArbiter,
    elements: OverlayElements,
    priority: PriorityControl,
    shutdown: bool,
    torn_down: bool,
}

impl Session {
    pub fn new(config: Config, platform: Platform) -> Self {
        Self::with_detector_config(config, platform, DetectorConfig::default())
    }

    pub fn with_detector_config(config: Config, platform: Platform, detector: DetectorConfig) -> Self {
        let devices = Rc::new(RefCell::new(DeviceVisibilityController::new(
            platform.filter_driver,
            platform.hid,
        )));

        let bridge = match platform.gamepad {
            Some((bus, input)) => Some(VirtualControllerBridge::new(
                bus,
                input,
                Arc::new(BridgeSettings::from_config(&config)),
            )),
            None => {
                tracing::error!("Virtual gamepad bus unavailable; controller emulation disabled");
                None
            }
        };

        let supervisor = ProcessSupervisor::new(platform.processes, &config.launch);
        let flags = Arc::new(FocusFlags::new(
            platform.own_window,
            config.controller.allow_desktop_config_when_unfocused,
            supervisor.shared(),
        ));
        let interceptor = (platform.interceptor)(Arc::clone(&flags));
        let focus = FocusArbiter::new(platform.windows, interceptor, flags);

        let mut elements = OverlayElements::new();
        let panel_devices = Rc::clone(&devices);
        let mut throttle = Throttle::new(DEVICE_PANEL_REFRESH);
        elements.register("devices", move |focused| {
            if focused && throttle.ready(Instant::now()) {
                panel_devices.borrow_mut().refresh();
            }
        });

        Self {
            config,
            devices,
            bridge,
            supervisor,
            detector: OverlayPresenceDetector::with_config(platform.messages, detector),
            focus,
            elements,
            priority: PriorityControl::new(platform.priority),
            shutdown: false,
            torn_down: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn devices(&self) -> &Rc<RefCell<DeviceVisibilityController>> {
        &self.devices
    }

    pub fn bridge(&self) -> Option<&VirtualControllerBridge> {
        self.bridge.as_ref()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn focus(&self) -> &FocusArbiter {
        &self.focus
    }

    pub fn focus_mut(&mut self) -> &mut FocusArbiter {
        &mut self.focus
    }

    pub fn elements_mut(&mut self) -> &mut OverlayElements {
        &mut self.elements
    }

    pub fn priority(&self) -> Option<ProcessPriority> {
        self.priority.current()
    }

    /// Handle to the managed process set for the control endpoint.
    pub fn shared_pids(&self) -> SharedPids {
        self.supervisor.shared()
    }

    /// Raises priority, hides devices, starts the bridge, installs the hook
    /// and launches the wrapped application. Only a launch failure is
    /// returned.
    pub fn start(&mut self) -> LaunchResult<()> {
        tracing::info!("Starting session {:?}", self.config.name);
        self.priority.set(ProcessPriority::default());
        if self.config.devices.hide_devices {
            self.devices.borrow_mut().apply(&[], true);
        } else {
            self.devices.borrow_mut().refresh();
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.start();
        }
        self.focus.install_hook();

        if self.config.launch.launch {
            let launch = self.config.launch.clone();
            self.supervisor
                .launch(&launch.launch_path, &launch.launch_app_args)?;
        }
        Ok(())
    }

    /// One frame of session work.
    pub fn tick(&mut self) {
        if let Some(state) = self.detector.update() {
            self.focus.on_overlay(state.is_open());
        }
        self.supervisor.update();
        if self.supervisor.shutdown_requested() {
            self.shutdown = true;
        }
        self.focus.tick();
    }

    /// Runs the overlay elements.
    pub fn draw_overlay(&mut self, window_has_focus: bool) {
        self.elements.draw(window_has_focus);
    }

    pub fn toggle_forced_focus(&mut self) {
        self.focus.toggle_forced_focus();
    }

    pub fn request_shutdown(&mut self) {
        if !self.shutdown {
            tracing::info!("Shutdown requested");
            self.shutdown = true;
        }
    }

    pub fn should_stop(&self) -> bool {
        self.shutdown
    }

    /// Answers a control endpoint command.
    pub fn handle(&mut self, command: &Command) -> Response {
        match command {
            Command::Settings => Response::with_settings(self.config.to_json()),
            Command::LaunchedPids => Response::with_pids(self.supervisor.launched_pids()),
            Command::Shutdown => {
                self.request_shutdown();
                Response::ok_with_message("shutting down")
            }
            Command::Status => {
                let mode = match self.focus.mode() {
                    FocusMode::Normal => "normal",
                    FocusMode::OverlayOpen => "overlay open",
                    FocusMode::ForcedFocus => "forced focus",
                };
                let priority = self
                    .priority
                    .current()
                    .map_or("unchanged", ProcessPriority::name);
                Response::ok_with_message(format!(
                    "running; focus: {mode}; priority: {priority}; {} process(es)",
                    self.supervisor.launched_pids().len()
                ))
            }
            Command::SetPriority { priority } => {
                if self.priority.set(*priority) {
                    Response::ok_with_message(format!("priority set to {priority}"))
                } else {
                    Response::error(format!("couldn't set priority to {priority}"))
                }
            }
        }
    }

    /// Restores the system. Every step runs even if an earlier one failed.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        tracing::info!("Tearing down session");

        guarded("remove foreground hook", || self.focus.remove_hook());
        guarded("stop controller bridge", || {
            if let Some(bridge) = self.bridge.as_mut() {
                bridge.stop();
            }
        });
        guarded("restore device visibility", || self.devices.borrow_mut().teardown());
        guarded("release process handles", || self.supervisor.close());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn guarded(step: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("Teardown step \"{step}\" failed");
    }
}
