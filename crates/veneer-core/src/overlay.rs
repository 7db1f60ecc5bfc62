//! Host platform overlay detection.
//!
//! While its overlay is open, the host platform rewrites the `message`
//! field of messages headed for this process to zero. Peeking the queue
//! once per frame and counting consecutive zeroes is the only signal
//! available; it can miss transitions, and nothing may wait on it.

/// Peeks the process message queue.
pub trait MessageSource {
    /// The `message` field of the next pending message, without removing
    /// it. `None` when the queue is empty.
    fn peek(&mut self) -> Option<u32>;
}

/// Overlay state as last committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayState {
    #[default]
    Closed,
    Open,
}

impl OverlayState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// Debounce parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Consecutive observations needed to commit a change.
    pub debounce: u32,
    /// Messages in `1..threshold` are ordinary input and are ignored.
    pub reserved_threshold: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            debounce: 3,
            reserved_threshold: 1000,
        }
    }
}

type Callback = Box<dyn FnMut(bool) + Send>;

pub struct OverlayPresenceDetector {
    source: Box<dyn MessageSource>,
    config: DetectorConfig,
    state: OverlayState,
    counter: u32,
    on_change: Vec<Callback>,
}

impl OverlayPresenceDetector {
    pub fn new(source: Box<dyn MessageSource>) -> Self {
        Self::with_config(source, DetectorConfig::default())
    }

    pub fn with_config(source: Box<dyn MessageSource>, config: DetectorConfig) -> Self {
        Self {
            source,
            config,
            state: OverlayState::Closed,
            counter: 0,
            on_change: Vec::new(),
        }
    }

    /// Registers a callback invoked with `true` on open and `false` on
    /// close.
    pub fn on_change(&mut self, callback: impl FnMut(bool) + Send + 'static) {
        self.on_change.push(Box::new(callback));
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Takes one observation. Returns the new state when it commits.
    pub fn update(&mut self) -> Option<OverlayState> {
        let message = self.source.peek()?;
        if message > 0 && message < self.config.reserved_threshold {
            return None;
        }

        let sentinel = message == 0;
        if sentinel != self.state.is_open() {
            self.counter += 1;
        } else {
            // Inconsistent with the pending change.
            self.counter = 0;
            return None;
        }

        if self.counter < self.config.debounce {
            return None;
        }
        self.counter = 0;
        self.state = if sentinel {
            OverlayState::Open
        } else {
            OverlayState::Closed
        };
        tracing::info!("Overlay {}", if sentinel { "opened" } else { "closed" });
        for callback in &mut self.on_change {
            callback(sentinel);
        }
        Some(self.state)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Script(VecDeque<Option<u32>>);

    impl MessageSource for Script {
        fn peek(&mut self) -> Option<u32> {
            self.0.pop_front().flatten()
        }
    }

    fn scripted(script: &[Option<u32>]) -> OverlayPresenceDetector {
        OverlayPresenceDetector::new(Box::new(Script(script.iter().copied().collect())))
    }

    fn run(detector: &mut OverlayPresenceDetector, ticks: usize) -> Vec<OverlayState> {
        (0..ticks).filter_map(|_| detector.update()).collect()
    }

    #[test]
    fn three_sentinels_commit_open() {
        // Arrange
        let mut detector = scripted(&[Some(0), Some(0), Some(0)]);

        // Act
        let changes = run(&mut detector, 3);

        // Assert
        assert_eq!(changes, vec![OverlayState::Open]);
        assert_eq!(detector.state(), OverlayState::Open);
    }

    #[test]
    fn two_sentinels_do_not_commit() {
        // Arrange
        let mut detector = scripted(&[Some(0), Some(0)]);

        // Act
        let changes = run(&mut detector, 2);

        // Assert
        assert!(changes.is_empty());
        assert_eq!(detector.state(), OverlayState::Closed);
    }

    #[test]
    fn one_normal_message_resets_the_counter() {
        // Arrange
        let mut detector = scripted(&[Some(0), Some(0), Some(1024), Some(0), Some(0)]);

        // Act
        let changes = run(&mut detector, 5);

        // Assert
        assert!(changes.is_empty());
        assert_eq!(detector.state(), OverlayState::Closed);
    }

    #[test]
    fn reserved_messages_and_empty_queue_are_ignored() {
        // Arrange
        let mut detector = scripted(&[Some(0), Some(0x0200), None, Some(0), Some(0)]);

        // Act
        let before = run(&mut detector, 4);
        let after = run(&mut detector, 1);

        // Assert
        assert!(before.is_empty());
        assert_eq!(after, vec![OverlayState::Open]);
    }

    #[test]
    fn close_needs_three_normal_messages() {
        // Arrange
        let mut detector = scripted(&[
            Some(0),
            Some(0),
            Some(0),
            Some(1200),
            Some(1200),
            Some(1200),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        detector.on_change(move |open| sink.lock().unwrap().push(open));

        // Act
        let changes = run(&mut detector, 6);

        // Assert
        assert_eq!(changes, vec![OverlayState::Open, OverlayState::Closed]);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn debounce_is_injectable() {
        // Arrange
        let script = Script([Some(0)].into_iter().collect());
        let mut detector = OverlayPresenceDetector::with_config(
            Box::new(script),
            DetectorConfig {
                debounce: 1,
                ..Default::default()
            },
        );

        // Act / Assert
        assert_eq!(detector.update(), Some(OverlayState::Open));
    }
}
