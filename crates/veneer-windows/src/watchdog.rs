//! Cleanup after a session that died without tearing down.
//!
//! Runs as its own process (`veneer watchdog <pid>`), polls the session's
//! control endpoint while it lives, and once it's gone turns device
//! filtering off and, per the launcher policy, terminates what it launched.

use std::thread;
use std::time::Duration;

use veneer_core::config;
use veneer_core::device::DeviceVisibilityController;
use veneer_core::ipc::{Command, ResponseStatus};
use veneer_core::log::{DiagnosticLog, LogConfig};
use veneer_core::process::ProcessHost;

use crate::hid::HidDevices;
use crate::hidhide::HidHide;
use crate::ipc;
use crate::process::{Win32Processes, terminate};

const POLL_INTERVAL: Duration = Duration::from_millis(1337);

/// Which cached processes may be terminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KillPolicy {
    kill_launcher: bool,
    ignore_launcher: bool,
}

impl KillPolicy {
    fn from_settings(settings: &serde_json::Value) -> Self {
        let flag = |name: &str| {
            settings["launch"][name]
                .as_bool()
                .unwrap_or_default()
        };
        Self {
            kill_launcher: flag("killLauncher"),
            ignore_launcher: flag("ignoreLauncher"),
        }
    }

    /// Either launchers are to die too, or the cached set never held them.
    fn terminates(self) -> bool {
        self.kill_launcher || self.ignore_launcher
    }
}

/// Watches `session_pid` until it exits, then cleans up after it.
pub fn run(session_pid: u32) {
    let _log_guard = veneer_core::log::init(
        &LogConfig::default(),
        false,
        config::data_dir().map(|d| d.join("logs").join("watchdog")).as_deref(),
        &DiagnosticLog::new(0, Duration::ZERO),
    );
    tracing::info!("Watchdog started for session {session_pid}");

    let mut processes = Win32Processes::new();
    let mut policy: Option<KillPolicy> = None;
    let mut cached: Vec<u32> = Vec::new();

    while processes.is_alive(session_pid) {
        if policy.is_none()
            && let Ok(response) = ipc::send_command(&Command::Settings)
            && let Some(settings) = response.settings
        {
            let found = KillPolicy::from_settings(&settings);
            tracing::debug!("Launcher policy: {found:?}");
            policy = Some(found);
        }
        match ipc::send_command(&Command::LaunchedPids) {
            Ok(response) if response.status == ResponseStatus::Ok => {
                if let Some(pids) = response.pids {
                    cached = pids;
                }
            }
            Ok(response) => tracing::debug!("Session refused pids: {:?}", response.message),
            Err(e) => tracing::trace!("Session not answering: {e}"),
        }
        thread::sleep(POLL_INTERVAL);
    }

    tracing::info!("Session {session_pid} exited; cleaning up");
    DeviceVisibilityController::new(Box::new(HidHide::new()), Box::new(HidDevices)).teardown();

    if !policy.unwrap_or_default().terminates() {
        tracing::info!("Leaving {} launched process(es) running", cached.len());
        return;
    }
    for pid in cached {
        if !processes.is_alive(pid) {
            continue;
        }
        if terminate(pid) {
            tracing::info!("Terminated {pid}");
        } else {
            tracing::warn!("Couldn't terminate {pid}");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn policy_reads_launch_flags() {
        // Arrange
        let settings = json!({ "launch": { "killLauncher": true, "ignoreLauncher": false } });

        // Act
        let policy = KillPolicy::from_settings(&settings);

        // Assert
        assert!(policy.kill_launcher);
        assert!(policy.terminates());
    }

    #[test]
    fn unfiltered_set_without_kill_is_left_alone() {
        // Act
        let policy = KillPolicy::from_settings(&json!({ "launch": {} }));

        // Assert
        assert_eq!(policy, KillPolicy::default());
        assert!(!policy.terminates());
    }

    #[test]
    fn filtered_set_is_terminated() {
        // Act
        let policy = KillPolicy::from_settings(&json!({ "launch": { "ignoreLauncher": true } }));

        // Assert
        assert!(policy.terminates());
    }
}
