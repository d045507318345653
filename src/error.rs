//! Error taxonomy shared across the session core
//!
//! Module-local failures (`ConfigError`, `ChannelError`, `MorseDecodeError`,
//! collaborator errors) live next to the code that raises them. The two
//! categories that cross module boundaries are defined here.

use std::time::Duration;

use crate::collaborators::{LlmError, SttError, TtsError};

/// GPIO line or audio device failure
///
/// Fatal during startup. Mid-session the controller falls back to Idle and
/// the device is reopened on the next button press.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("gpio line {pin} unavailable: {reason}")]
    Gpio { pin: u32, reason: String },

    #[error("audio device unavailable: {0}")]
    AudioDevice(String),

    #[error("audio stream failed: {0}")]
    Stream(String),
}

/// Which external service a collaborator failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcribe,
    Query,
    Synthesize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Transcribe => write!(f, "stt"),
            Stage::Query => write!(f, "llm"),
            Stage::Synthesize => write!(f, "tts"),
        }
    }
}

/// Failure of an STT/LLM/TTS call
///
/// Never fatal: the controller renders an error indicator for the session
/// that produced it and returns to Idle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Stt(#[from] SttError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Tts(#[from] TtsError),

    #[error("{stage} call timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("nothing intelligible was captured")]
    EmptyUtterance,

    #[error("no result within {after:?}")]
    Stalled { after: Duration },
}
