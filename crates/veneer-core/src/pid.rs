use std::fs;
use std::path::PathBuf;

use crate::config::data_dir;
use crate::error::ConfigError;

fn pid_path() -> Result<PathBuf, ConfigError> {
    let dir = data_dir().ok_or(ConfigError::NoDataDir)?;
    fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    Ok(dir.join("veneer.pid"))
}

/// Writes the current process's PID to the PID file.
///
/// Lets the CLI tell a live session from a stale pipe, and lets `stop`
/// kill a session that no longer answers.
pub fn write_pid_file() -> Result<(), ConfigError> {
    let path = pid_path()?;
    fs::write(&path, std::process::id().to_string()).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Reads the PID from the PID file, if it exists and parses.
pub fn read_pid_file() -> Option<u32> {
    let path = pid_path().ok()?;
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Removes the PID file. Called when the session shuts down cleanly.
pub fn remove_pid_file() {
    if let Ok(path) = pid_path()
        && path.exists()
    {
        let _ = fs::remove_file(path);
    }
}
