//! Logging setup on top of `tracing`.
//!
//! Logs go to `<data dir>/logs/veneer.log` through a non-blocking
//! appender, optionally to stderr, and always into a small in-memory
//! [`DiagnosticLog`] that backs the on-screen log panel.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "veneer.log";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether file logging is enabled.
    pub enabled: bool,
    /// Minimum log level: "trace", "debug", "info", "warn", or "error".
    pub level: String,
    /// Mirror log lines to stderr.
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".into(),
            console: false,
        }
    }
}

impl LogConfig {
    /// Filter directive for this configuration.
    pub fn directive(&self, extended: bool) -> String {
        if extended {
            return "trace".into();
        }
        match self.level.to_ascii_lowercase().as_str() {
            l @ ("trace" | "debug" | "info" | "warn" | "error") => l.to_string(),
            _ => "info".into(),
        }
    }
}

/// Initialises the global subscriber. Call once at startup.
///
/// Returns the appender guard when file logging is active; it must be
/// held for the lifetime of the process so buffered lines get flushed.
pub fn init(
    config: &LogConfig,
    extended: bool,
    log_dir: Option<&Path>,
    panel: &DiagnosticLog,
) -> Option<WorkerGuard> {
    let filter = EnvFilter::new(config.directive(extended));

    let mut guard = None;
    let file_layer = match log_dir.filter(|_| config.enabled) {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true),
            )
        }
        _ => None,
    };

    let console_layer = config
        .console
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .with(panel.layer())
        .try_init();

    guard
}

/// One captured log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub at: Instant,
}

/// Bounded buffer of recent log lines for the diagnostic panel.
///
/// Entries at `INFO` and above are kept for `retention`, and at most
/// `capacity` of them at a time.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
    retention: Duration,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(64, Duration::from_secs(5))
    }
}

impl DiagnosticLog {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            retention,
        }
    }

    /// A subscriber layer feeding this buffer.
    pub fn layer(&self) -> DiagnosticLayer {
        DiagnosticLayer { log: self.clone() }
    }

    pub fn push(&self, level: Level, message: String) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            level,
            message,
            at: Instant::now(),
        });
    }

    /// Returns the entries still inside the retention window, oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        let Ok(mut entries) = self.entries.lock() else {
            return Vec::new();
        };
        let now = Instant::now();
        while let Some(front) = entries.front() {
            if now.duration_since(front.at) > self.retention {
                entries.pop_front();
            } else {
                break;
            }
        }
        entries.iter().cloned().collect()
    }
}

/// `tracing` layer that mirrors events into a [`DiagnosticLog`].
pub struct DiagnosticLayer {
    log: DiagnosticLog,
}

impl<S: Subscriber> Layer<S> for DiagnosticLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.log.push(level, visitor.message + &visitor.fields);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }
}
