use anyhow::Context;
use veneer_core::{Overrides, pid};
use veneer_windows::{RunOptions, ipc, process};

use crate::RunArgs;

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    if ipc::is_session_running() {
        anyhow::bail!("A Veneer session is already running.");
    }

    // Clean up a stale PID file from a previous unclean exit.
    if let Some(pid) = pid::read_pid_file() {
        if process::is_process_alive(pid) {
            anyhow::bail!("Veneer process exists (PID: {pid}) but is not responding.");
        }
        pid::remove_pid_file();
    }

    let options = RunOptions {
        target: args.target,
        overrides: Overrides {
            extended_logging: args.extended_logging,
            ignore_launcher: args.ignore_launcher,
            window_mode: args.window_mode,
        },
        disable_watchdog: args.disable_watchdog,
    };
    veneer_windows::run(options)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("session failed")
}
