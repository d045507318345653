//! Session events
//!
//! Broadcast by the session controller for anything that wants to follow a
//! session from outside: logs, `--events-json` output, indicator LEDs.

use serde::{Deserialize, Serialize};

use crate::session::{Mode, SessionState};

/// Events emitted by the session controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Controller moved between states
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// A press opened a new session
    SessionStarted { generation: u64, mode: Mode },

    /// Tap-then-press switched the session to morse
    GestureRecognized { generation: u64 },

    /// Voice capture ended
    CaptureStopped {
        generation: u64,
        duration_ms: u64,
        /// Stopped by the capture ceiling rather than a release
        auto_stopped: bool,
    },

    /// Transcribed or decoded text is on its way to the model
    UtteranceReady {
        generation: u64,
        text: String,
        source: Mode,
    },

    /// The model answered
    ResponseReady { generation: u64, text: String },

    /// A collaborator failed; an error indicator is played instead
    SessionFailed { generation: u64, error: String },

    /// A press cut the session short
    BargeIn { generation: u64, during: SessionState },

    /// The session returned to Idle
    SessionFinished { generation: u64, duration_ms: u64 },

    /// The audio device reported a fault
    DeviceFault { message: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::StateChanged { from, to } => {
                write!(f, "STATE_CHANGED ({} -> {})", from, to)
            }
            SessionEvent::SessionStarted { generation, mode } => {
                write!(f, "SESSION_STARTED #{} ({})", generation, mode)
            }
            SessionEvent::GestureRecognized { generation } => {
                write!(f, "GESTURE_RECOGNIZED #{}", generation)
            }
            SessionEvent::CaptureStopped {
                generation,
                duration_ms,
                auto_stopped,
            } => {
                let how = if *auto_stopped { ", ceiling" } else { "" };
                write!(f, "CAPTURE_STOPPED #{} ({}ms{})", generation, duration_ms, how)
            }
            SessionEvent::UtteranceReady {
                generation, source, ..
            } => write!(f, "UTTERANCE_READY #{} ({})", generation, source),
            SessionEvent::ResponseReady { generation, .. } => {
                write!(f, "RESPONSE_READY #{}", generation)
            }
            SessionEvent::SessionFailed { generation, error } => {
                write!(f, "SESSION_FAILED #{}: {}", generation, error)
            }
            SessionEvent::BargeIn { generation, during } => {
                write!(f, "BARGE_IN #{} (during {})", generation, during)
            }
            SessionEvent::SessionFinished {
                generation,
                duration_ms,
            } => write!(f, "SESSION_FINISHED #{} ({}ms)", generation, duration_ms),
            SessionEvent::DeviceFault { message } => write!(f, "DEVICE_FAULT: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::SessionFinished {
            generation: 3,
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"session_finished""#));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"state_changed","from":"idle","to":"listening_voice"}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            SessionEvent::StateChanged {
                from: SessionState::Idle,
                to: SessionState::ListeningVoice,
            }
        );
    }

    #[test]
    fn test_display() {
        let event = SessionEvent::BargeIn {
            generation: 7,
            during: SessionState::Responding,
        };
        assert_eq!(event.to_string(), "BARGE_IN #7 (during Responding)");
    }
}
