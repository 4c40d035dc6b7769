//! Press debouncing
//!
//! Contacts bounce for a few milliseconds, producing bursts of edges. Only
//! the first edge of a burst counts as a press.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Accept an edge seen at `at` if it is more than one window after the
    /// last accepted one
    pub fn accept(&mut self, at: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if at.saturating_duration_since(last) <= self.window {
                return false;
            }
        }
        self.last_accepted = Some(at);
        true
    }
}
