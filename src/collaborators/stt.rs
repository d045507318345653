//! whisper.cpp transcription

use std::ffi::OsStr;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::audio::AudioBuffer;
use crate::config::{AssistantConfig, SttEngine};

use super::command::{self, CommandFailure};
use super::{SpeechToText, SttError};

/// whisper.cpp expects 16 kHz mono input
const WHISPER_SAMPLE_RATE: u32 = 16000;

const DEFAULT_PROGRAM: &str = "whisper-cli";

/// Runs the whisper.cpp CLI on a temporary WAV file
pub struct WhisperCpp {
    program: String,
    model: PathBuf,
}

impl WhisperCpp {
    pub fn new(config: &AssistantConfig) -> Self {
        let program = match config.model_type {
            SttEngine::WhisperCpp => config
                .stt_command
                .clone()
                .unwrap_or_else(|| DEFAULT_PROGRAM.to_string()),
        };
        Self {
            program,
            model: config.model_path.clone(),
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperCpp {
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, SttError> {
        let input = audio
            .conform(WHISPER_SAMPLE_RATE, 1)
            .map_err(|e| SttError::Engine(format!("preparing capture: {e}")))?;
        let file = tempfile::Builder::new()
            .prefix("rune-capture-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| SttError::Engine(format!("creating scratch file: {e}")))?;
        input
            .write_wav(file.path())
            .map_err(|e| SttError::Engine(format!("writing capture: {e}")))?;

        debug!(
            duration_ms = input.duration().as_millis() as u64,
            "transcribing capture"
        );

        let output = command::run(
            &self.program,
            [
                OsStr::new("-m"),
                self.model.as_os_str(),
                OsStr::new("-f"),
                file.path().as_os_str(),
                OsStr::new("-nt"),
                OsStr::new("-np"),
            ],
            None,
        )
        .await
        .map_err(|failure| match failure {
            CommandFailure::Spawn(reason) => SttError::Unavailable(reason),
            CommandFailure::Exit(reason) => SttError::Engine(reason),
        })?;

        Ok(command::flatten(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    #[tokio::test]
    async fn test_engine_arguments() {
        let mut config = sample_config().assistant;
        config.stt_command = Some("echo".to_string());
        let stt = WhisperCpp::new(&config);

        let text = stt
            .transcribe(&AudioBuffer::new(vec![0.0; 800], 8000, 1))
            .await
            .unwrap();
        assert!(text.starts_with("-m models/ggml-base.en.bin -f "));
        assert!(text.ends_with(".wav -nt -np"));
    }

    #[tokio::test]
    async fn test_missing_engine_is_unavailable() {
        let mut config = sample_config().assistant;
        config.stt_command = Some("/nonexistent/whisper-cli".to_string());
        let err = WhisperCpp::new(&config)
            .transcribe(&AudioBuffer::new(Vec::new(), 16000, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SttError::Unavailable(_)));
    }
}
