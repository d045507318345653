//! Edge debouncing for the push-to-talk line

use std::time::{Duration, Instant};

/// Direction of an accepted button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Press,
    Release,
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Press => write!(f, "press"),
            Edge::Release => write!(f, "release"),
        }
    }
}

/// A clean press or release
///
/// `timestamp` is when the level change began, not when it was confirmed,
/// so key-down and key-up spans are measured without the window's delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub edge: Edge,
    pub timestamp: Instant,
}

/// Turns raw level samples into [`ButtonEvent`]s
///
/// A change is accepted once it has held for the whole window. A level that
/// flips back before then is treated as bounce and forgotten.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    /// Last accepted level; true while pressed
    stable: bool,
    /// When the level first differed from `stable`
    pending_since: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stable: false,
            pending_since: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    #[cfg(test)]
    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    /// Feed one sample; returns an event when a transition is accepted
    pub fn observe(&mut self, pressed: bool, now: Instant) -> Option<ButtonEvent> {
        if pressed == self.stable {
            self.pending_since = None;
            return None;
        }

        let since = *self.pending_since.get_or_insert(now);
        if now.saturating_duration_since(since) < self.window {
            return None;
        }

        self.stable = pressed;
        self.pending_since = None;
        Some(ButtonEvent {
            edge: if pressed { Edge::Press } else { Edge::Release },
            timestamp: since,
        })
    }
}
