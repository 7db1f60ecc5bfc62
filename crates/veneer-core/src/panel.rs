//! Diagnostic overlay elements.
//!
//! Components register a callback per panel; the renderer calls each one
//! once per frame with whether the target window has focus. Callbacks
//! must not block.

use std::time::{Duration, Instant};

type Element = Box<dyn FnMut(bool)>;

#[derive(Default)]
pub struct OverlayElements {
    elements: Vec<(String, Element)>,
}

impl OverlayElements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, element: impl FnMut(bool) + 'static) {
        let name = name.into();
        tracing::trace!("Registered overlay element {name}");
        self.elements.push((name, Box::new(element)));
    }

    /// Invokes every element in registration order.
    pub fn draw(&mut self, window_has_focus: bool) {
        for (_, element) in &mut self.elements {
            element(window_has_focus);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Rate limit for periodic panel work.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    period: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// True at most once per period. The first call is always due.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
