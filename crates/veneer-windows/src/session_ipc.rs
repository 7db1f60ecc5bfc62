use std::sync::mpsc;

use veneer_core::ipc::{Command, Response};
use veneer_core::process::SharedPids;

use crate::ipc::ControlEndpoint;

use super::session_types::{ResponseSender, SessionMsg};

/// Accepts control connections in a loop. Runs on a dedicated thread.
///
/// `LaunchedPids` is answered here from the shared process set so the
/// watchdog never waits on a frame. Everything else goes to the frame loop.
pub(super) fn ipc_loop(tx: mpsc::Sender<SessionMsg>, pids: SharedPids) {
    loop {
        let endpoint = match ControlEndpoint::open() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!("Control endpoint unavailable: {e}");
                return;
            }
        };

        let command = match endpoint.next_command() {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!("Error reading control command: {e}");
                continue;
            }
        };
        tracing::debug!("Control command: {command:?}");

        if command == Command::LaunchedPids {
            let _ = endpoint.reply(&Response::with_pids(pids.launched_pids()));
            continue;
        }

        let (reply_tx, reply_rx): (ResponseSender, _) = mpsc::channel();
        let is_shutdown = command == Command::Shutdown;

        if tx.send(SessionMsg::Command(command, reply_tx)).is_err() {
            let _ = endpoint.reply(&Response::error("session is ending"));
            return;
        }

        if let Ok(response) = reply_rx.recv() {
            let _ = endpoint.reply(&response);
        }

        if is_shutdown {
            return;
        }
    }
}
