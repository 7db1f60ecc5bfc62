use std::path::PathBuf;

use veneer_core::{Overrides, PlatformResult, config, pid};

#[path = "session_ipc.rs"]
mod session_ipc;
#[path = "session_loop.rs"]
mod session_loop;
#[path = "session_threads.rs"]
mod session_threads;
#[path = "session_types.rs"]
mod session_types;

/// How the CLI asked for the session to be run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Target name or config path; `None` selects the default config.
    pub target: Option<String>,
    pub overrides: Overrides,
    pub disable_watchdog: bool,
}

/// Runs one session to completion.
///
/// The calling thread becomes the frame loop and owns the target window.
/// The control endpoint listener and the Ctrl+C handler feed it through a
/// channel.
pub fn run(options: RunOptions) -> PlatformResult<()> {
    let path: Option<PathBuf> = config::resolve_path(options.target.as_deref());
    let mut config = config::load(path.as_deref());
    config.apply_overrides(options.overrides);

    pid::write_pid_file()?;
    let result = session_loop::session_loop(config, options.disable_watchdog);
    pid::remove_pid_file();

    result
}
