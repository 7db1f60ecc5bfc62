use std::os::windows::process::CommandExt;
use std::sync::mpsc;
use std::thread;

use veneer_core::process::SharedPids;

use crate::ctrl_c;

use super::session_ipc;
use super::session_types::SessionMsg;

/// Detached from this console so closing it leaves the watchdog running.
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// Spawns the control endpoint listener thread.
pub(super) fn spawn_ipc_listener(
    tx: mpsc::Sender<SessionMsg>,
    pids: SharedPids,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("control-endpoint".into())
        .spawn(move || session_ipc::ipc_loop(tx, pids))
}

/// Routes Ctrl+C into the frame loop's channel.
pub(super) fn spawn_interrupt_bridge(tx: mpsc::Sender<SessionMsg>) -> std::io::Result<()> {
    let (ctrl_c_tx, ctrl_c_rx) = mpsc::channel();
    ctrl_c::set_handler(ctrl_c_tx);
    thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            for () in ctrl_c_rx {
                if tx.send(SessionMsg::Interrupt).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}

/// Starts `veneer watchdog <pid>` as a separate process.
pub(super) fn spawn_watchdog() {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            tracing::error!("Couldn't locate own executable for the watchdog: {e}");
            return;
        }
    };
    let spawned = std::process::Command::new(exe)
        .arg("watchdog")
        .arg(std::process::id().to_string())
        .creation_flags(DETACHED_PROCESS)
        .spawn();
    match spawned {
        Ok(child) => tracing::info!("Watchdog started (PID: {})", child.id()),
        Err(e) => tracing::error!("Couldn't start the watchdog: {e}"),
    }
}
