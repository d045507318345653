//! Session states and the values that flow between them

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ModePolicyKind;

/// The five states of the session controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for a press
    #[default]
    Idle,
    /// Capturing speech while the button is held
    ListeningVoice,
    /// Timing key-down/key-up spans
    ListeningMorse,
    /// Collaborator calls in flight
    Processing,
    /// Playing the answer or an error indicator
    Responding,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::ListeningVoice => write!(f, "ListeningVoice"),
            SessionState::ListeningMorse => write!(f, "ListeningMorse"),
            SessionState::Processing => write!(f, "Processing"),
            SessionState::Responding => write!(f, "Responding"),
        }
    }
}

/// Input and output channel of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Voice,
    Morse,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Voice => write!(f, "voice"),
            Mode::Morse => write!(f, "morse"),
        }
    }
}

/// Decides which listening state a fresh press enters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePolicy {
    /// Every session is spoken
    Voice,
    /// Every session is keyed
    Morse,
    /// Voice, unless tap-then-press inside `window` switches to morse
    Gesture { window: Duration },
}

impl ModePolicy {
    pub fn from_config(kind: ModePolicyKind, window: Duration) -> Self {
        match kind {
            ModePolicyKind::Voice => ModePolicy::Voice,
            ModePolicyKind::Morse => ModePolicy::Morse,
            ModePolicyKind::Gesture => ModePolicy::Gesture { window },
        }
    }

    /// Mode a press starts in before any gesture is seen
    pub fn initial_mode(&self) -> Mode {
        match self {
            ModePolicy::Morse => Mode::Morse,
            ModePolicy::Voice | ModePolicy::Gesture { .. } => Mode::Voice,
        }
    }

    /// Window in which a tap followed by a press toggles to morse
    pub fn gesture_window(&self) -> Option<Duration> {
        match self {
            ModePolicy::Gesture { window } => Some(*window),
            _ => None,
        }
    }
}

/// Text handed to the language model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub source: Mode,
}

/// Text returned by the language model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_policy_initial_mode() {
        let window = Duration::from_millis(350);
        assert_eq!(ModePolicy::Voice.initial_mode(), Mode::Voice);
        assert_eq!(ModePolicy::Morse.initial_mode(), Mode::Morse);
        let gesture = ModePolicy::from_config(ModePolicyKind::Gesture, window);
        assert_eq!(gesture.initial_mode(), Mode::Voice);
        assert_eq!(gesture.gesture_window(), Some(window));
        assert_eq!(ModePolicy::Voice.gesture_window(), None);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::ListeningMorse).unwrap();
        assert_eq!(json, r#""listening_morse""#);
    }
}
