pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod focus;
pub mod ipc;
pub mod locate;
pub mod log;
pub mod overlay;
pub mod panel;
pub mod pid;
pub mod priority;
pub mod process;
pub mod session;
pub mod unhook;

pub use config::{Config, LaunchKind, Overrides};
pub use controller::{ControllerSlot, GamepadBus, InputSource, ProfileKind, VirtualControllerBridge};
pub use device::{DeviceVisibilityController, DeviceVisibilityEntry, FilterDriver, HidEnumerator};
pub use error::{ConfigError, DriverError, DriverResult, LaunchError, LaunchResult, PlatformResult};
pub use focus::{FocusArbiter, FocusMode, ForegroundInterceptor, WindowSystem};
pub use ipc::{Command, PIPE_NAME, Response, ResponseStatus};
pub use locate::{Locate, PatternLocator};
pub use overlay::{DetectorConfig, MessageSource, OverlayPresenceDetector, OverlayState};
pub use panel::OverlayElements;
pub use priority::{PriorityClass, ProcessPriority};
pub use process::{ProcessHost, ProcessInfo, ProcessSupervisor, SharedPids};
pub use session::Session;
