use thiserror::Error;

/// Failures reported by the device-filtering driver, the virtual-gamepad
/// bus, or the real input subsystem.
///
/// Callers log these and treat the operation as a no-op. Only the
/// virtual-target add path retries, and only once.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("driver is not installed or not reachable: {0}")]
    NotInstalled(String),

    #[error("failed to open driver handle: {0}")]
    OpenFailed(String),

    #[error("driver request {code:#x} failed: {reason}")]
    RequestFailed { code: u32, reason: String },

    #[error("virtual target is uninitialized")]
    TargetUninitialized,

    #[error("{0}")]
    Other(String),
}

/// Failures from launching the wrapped application.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("launch requires elevation")]
    ElevationRequired,

    #[error("access denied")]
    AccessDenied,

    #[error("target not found: {0}")]
    NotFound(String),

    #[error("package activation failed: {0}")]
    ActivationFailed(String),

    #[error("launch failed: {0}")]
    Other(String),
}

/// Failures while reading a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not determine the data directory")]
    NoDataDir,
}

pub type DriverResult<T> = Result<T, DriverError>;
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Boxed error for platform plumbing: windows, pipes, COM.
pub type PlatformResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
