//! Scheduling priority of the session process.
//!
//! Sessions start at [`ProcessPriority::High`], which can help with input
//! latency. The control endpoint changes it while running.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessPriority {
    Realtime,
    #[default]
    High,
    AboveNormal,
    Normal,
    BelowNormal,
    Low,
}

impl ProcessPriority {
    pub const ALL: [Self; 6] = [
        Self::Realtime,
        Self::High,
        Self::AboveNormal,
        Self::Normal,
        Self::BelowNormal,
        Self::Low,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::High => "high",
            Self::AboveNormal => "above-normal",
            Self::Normal => "normal",
            Self::BelowNormal => "below-normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for ProcessPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown priority {0:?} (expected realtime, high, above-normal, normal, below-normal or low)")]
pub struct UnknownPriority(pub String);

impl FromStr for ProcessPriority {
    type Err = UnknownPriority;

    /// Accepts the kebab-case names, ignoring case, `_` and spaces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .trim()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c.to_ascii_lowercase() })
            .collect();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| UnknownPriority(s.to_string()))
    }
}

/// Sets the priority class of this process.
pub trait PriorityClass {
    /// Returns whether the change took effect.
    fn apply(&mut self, priority: ProcessPriority) -> bool;
}

/// Remembers the last priority that took effect.
pub struct PriorityControl {
    class: Box<dyn PriorityClass + Send>,
    current: Option<ProcessPriority>,
}

impl PriorityControl {
    pub fn new(class: Box<dyn PriorityClass + Send>) -> Self {
        Self { class, current: None }
    }

    /// `None` until a change has succeeded.
    pub fn current(&self) -> Option<ProcessPriority> {
        self.current
    }

    pub fn set(&mut self, priority: ProcessPriority) -> bool {
        if self.current == Some(priority) {
            return true;
        }
        if !self.class.apply(priority) {
            tracing::warn!("Couldn't set process priority to {priority}");
            return false;
        }
        tracing::info!("Process priority set to {priority}");
        self.current = Some(priority);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Recorder {
        applied: Arc<Mutex<Vec<ProcessPriority>>>,
        accept: bool,
    }

    impl PriorityClass for Recorder {
        fn apply(&mut self, priority: ProcessPriority) -> bool {
            self.applied.lock().unwrap().push(priority);
            self.accept
        }
    }

    fn control(accept: bool) -> (PriorityControl, Arc<Mutex<Vec<ProcessPriority>>>) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            applied: Arc::clone(&applied),
            accept,
        };
        (PriorityControl::new(Box::new(recorder)), applied)
    }

    #[test]
    fn names_parse_loosely() {
        // Act / Assert
        assert_eq!("Above_Normal".parse(), Ok(ProcessPriority::AboveNormal));
        assert_eq!(" below normal ".parse(), Ok(ProcessPriority::BelowNormal));
        assert_eq!("HIGH".parse(), Ok(ProcessPriority::High));
        assert_eq!(
            "turbo".parse::<ProcessPriority>(),
            Err(UnknownPriority("turbo".into()))
        );
    }

    #[test]
    fn serializes_as_kebab_case() {
        // Act
        let json = serde_json::to_string(&ProcessPriority::AboveNormal).unwrap();

        // Assert
        assert_eq!(json, r#""above-normal""#);
    }

    #[test]
    fn repeated_priority_is_applied_once() {
        // Arrange
        let (mut control, applied) = control(true);

        // Act
        control.set(ProcessPriority::High);
        control.set(ProcessPriority::High);
        control.set(ProcessPriority::Low);

        // Assert
        assert_eq!(*applied.lock().unwrap(), vec![ProcessPriority::High, ProcessPriority::Low]);
        assert_eq!(control.current(), Some(ProcessPriority::Low));
    }

    #[test]
    fn failed_change_keeps_the_previous_priority() {
        // Arrange
        let (mut control, _applied) = control(false);

        // Act
        let changed = control.set(ProcessPriority::Realtime);

        // Assert
        assert!(!changed);
        assert_eq!(control.current(), None);
    }
}
