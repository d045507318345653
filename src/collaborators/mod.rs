//! External speech and language services
//!
//! The session core only sees the three traits below and awaits each call
//! under its own timeout. The shipped adapters drive local engines as child
//! processes that die with the call; none of them touch the network.

mod command;
mod llm;
mod stt;
mod tts;

use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::AudioBuffer;
use crate::config::AssistantConfig;

pub use llm::CommandLanguageModel;
pub use stt::WhisperCpp;
pub use tts::CommandSynthesizer;

/// Speech-to-text failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("stt engine unavailable: {0}")]
    Unavailable(String),

    #[error("stt engine failed: {0}")]
    Engine(String),
}

/// Language model failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("llm engine unavailable: {0}")]
    Unavailable(String),

    #[error("llm engine failed: {0}")]
    Engine(String),
}

/// Speech synthesis failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("tts engine unavailable: {0}")]
    Unavailable(String),

    #[error("tts engine failed: {0}")]
    Engine(String),
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, SttError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn query(&self, prompt: &str) -> Result<String, LlmError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer, TtsError>;
}

/// The three services a session may call
#[derive(Clone)]
pub struct Collaborators {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
}

impl Collaborators {
    /// Wire up the local engines named in the assistant config
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self {
            stt: Arc::new(WhisperCpp::new(config)),
            llm: Arc::new(CommandLanguageModel::new(config)),
            tts: Arc::new(CommandSynthesizer::new(config)),
        }
    }
}
