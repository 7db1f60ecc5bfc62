//! Ctrl+C and console-close handling through `SetConsoleCtrlHandler`.

use std::sync::OnceLock;
use std::sync::mpsc::Sender;

use windows::Win32::System::Console::{
    CTRL_BREAK_EVENT, CTRL_C_EVENT, CTRL_CLOSE_EVENT, SetConsoleCtrlHandler,
};

/// Written once by `set_handler`, read by the callback.
static SENDER: OnceLock<Sender<()>> = OnceLock::new();

/// Registers a console handler that sends `()` on the given channel.
///
/// A second registration is ignored. Failure to register is logged; the
/// session then only ends through the control endpoint or the target
/// application exiting.
pub fn set_handler(tx: Sender<()>) {
    if SENDER.set(tx).is_err() {
        tracing::warn!("Console handler already registered");
        return;
    }
    // SAFETY: `handler` is a valid `extern "system"` callback for the
    // lifetime of the process.
    if let Err(e) = unsafe { SetConsoleCtrlHandler(Some(handler), true) } {
        tracing::error!("Couldn't register the console handler: {e}");
    }
}

unsafe extern "system" fn handler(ctrl_type: u32) -> windows::core::BOOL {
    if matches!(ctrl_type, CTRL_C_EVENT | CTRL_BREAK_EVENT | CTRL_CLOSE_EVENT)
        && let Some(tx) = SENDER.get()
    {
        let _ = tx.send(());
    }
    windows::core::BOOL(1)
}
