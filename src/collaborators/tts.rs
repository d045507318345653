//! Speech synthesis via piper or espeak-ng

use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::audio::AudioBuffer;
use crate::config::{AssistantConfig, TtsEngine};

use super::command::{self, CommandFailure};
use super::{SpeechSynthesizer, TtsError};

/// Renders speech into a temporary WAV and decodes it
pub struct CommandSynthesizer {
    engine: TtsEngine,
    program: String,
    voice: PathBuf,
}

impl CommandSynthesizer {
    pub fn new(config: &AssistantConfig) -> Self {
        let default_program = match config.voice_model_type {
            TtsEngine::Piper => "piper",
            TtsEngine::Espeak => "espeak-ng",
        };
        Self {
            engine: config.voice_model_type,
            program: config
                .tts_command
                .clone()
                .unwrap_or_else(|| default_program.to_string()),
            voice: config.voice_model_path.clone(),
        }
    }

    fn arguments(&self, text: &str, output: &std::path::Path) -> (Vec<OsString>, Option<String>) {
        match self.engine {
            TtsEngine::Piper => (
                vec![
                    "--model".into(),
                    self.voice.clone().into_os_string(),
                    "--output_file".into(),
                    output.as_os_str().to_owned(),
                ],
                Some(text.to_string()),
            ),
            TtsEngine::Espeak => {
                let mut args: Vec<OsString> = vec!["-w".into(), output.as_os_str().to_owned()];
                if !self.voice.as_os_str().is_empty() {
                    args.push("-v".into());
                    args.push(self.voice.clone().into_os_string());
                }
                args.push(text.into());
                (args, None)
            }
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer, TtsError> {
        let file = tempfile::Builder::new()
            .prefix("rune-speech-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| TtsError::Engine(format!("creating scratch file: {e}")))?;

        debug!(engine = ?self.engine, chars = text.len(), "synthesizing response");

        let (args, stdin) = self.arguments(text, file.path());
        command::run(&self.program, args, stdin.as_deref())
            .await
            .map_err(|failure| match failure {
                CommandFailure::Spawn(reason) => TtsError::Unavailable(reason),
                CommandFailure::Exit(reason) => TtsError::Engine(reason),
            })?;

        AudioBuffer::read_wav(file.path())
            .map_err(|e| TtsError::Engine(format!("reading synthesized audio: {e}")))
    }
}
