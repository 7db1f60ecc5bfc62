#![cfg(windows)]

/// Ctrl+C handling.
pub mod ctrl_c;

/// HID device enumeration.
pub mod hid;

/// The HidHide filter driver.
pub mod hidhide;

/// In-process interception of the foreground window query.
pub mod hook;

/// Global hotkeys.
pub mod hotkey;

/// Control endpoint over a named pipe.
pub mod ipc;

/// Overlay detection message source.
pub mod message;

/// Process launch, liveness and termination.
pub mod process;

/// Scheduling priority of this process.
pub mod priority;

/// The session frame loop.
pub mod session;

/// Virtual gamepads on the ViGEm bus.
pub mod vigem;

/// Removal of the host platform's hooks on system functions.
pub mod unpatch;

/// Post-crash cleanup process.
pub mod watchdog;

/// The target window and the desktop window manager.
pub mod window;

/// Real controllers through XInput.
pub mod xinput;

mod handle;

pub use session::{RunOptions, run};
