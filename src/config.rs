//! Configuration loading and management
//!
//! The daemon reads a single YAML file once at startup. Every duration is
//! written in seconds and parsed straight into a `Duration`, so a negative or
//! non-finite value is rejected before the session loop ever starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Path used when neither `--config` nor `RUNE_CONFIG` is given
pub const DEFAULT_CONFIG_PATH: &str = "config/default.yml";

/// Environment variable naming an alternate config file
pub const CONFIG_ENV: &str = "RUNE_CONFIG";

/// Floor for the derived debounce window
const MIN_DEBOUNCE: Duration = Duration::from_millis(10);

/// Errors raised while loading configuration (always fatal)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub audio: AudioConfig,

    /// GPIO line number of the push-to-talk button
    pub ptt_pin: u32,

    pub assistant: AssistantConfig,

    pub morse: MorseConfig,

    #[serde(default)]
    pub button: ButtonConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Audio device settings
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Capture and playback rate in Hz
    pub sample_rate: u32,

    pub channels: u16,

    #[serde(default)]
    pub input_device: DeviceSelector,

    #[serde(default)]
    pub output_device: DeviceSelector,
}

/// Either the host default device or one picked by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DeviceSelector {
    #[default]
    Default,
    Named(String),
}

impl From<String> for DeviceSelector {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            DeviceSelector::Default
        } else {
            DeviceSelector::Named(trimmed.to_string())
        }
    }
}

/// Speech-to-text engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SttEngine {
    WhisperCpp,
}

/// Language-model engine family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmEngine {
    #[default]
    Ollama,
    LlamaCpp,
}

/// Speech-synthesis engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TtsEngine {
    Piper,
    Espeak,
}

/// Local model selection for the three collaborators
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// Speech recognition model file
    pub model_path: PathBuf,

    pub model_type: SttEngine,

    /// Model tag (ollama) or model file (llama.cpp)
    pub llm_model_name: String,

    #[serde(default)]
    pub llm_engine: LlmEngine,

    pub voice_model_type: TtsEngine,

    /// Voice model file (piper) or voice name (espeak)
    #[serde(default)]
    pub voice_model_path: PathBuf,

    /// Executable overrides for the engines
    #[serde(default)]
    pub stt_command: Option<String>,
    #[serde(default)]
    pub llm_command: Option<String>,
    #[serde(default)]
    pub tts_command: Option<String>,
}

/// Morse timing and sidetone
#[derive(Debug, Clone, Deserialize)]
pub struct MorseConfig {
    /// Unit duration U (one dot)
    #[serde(with = "seconds")]
    pub dot_duration: Duration,

    /// Keying tone in Hz
    pub frequency: f32,
}

/// Button line sampling
#[derive(Debug, Clone, Deserialize)]
pub struct ButtonConfig {
    /// Line reads low while the button is held (pull-up wiring)
    #[serde(default = "default_active_low")]
    pub active_low: bool,

    #[serde(default = "default_poll_interval", with = "seconds")]
    pub poll_interval: Duration,

    /// Stabilization window override; derived from `dot_duration` when unset
    #[serde(default, with = "optional_seconds")]
    pub debounce: Option<Duration>,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            active_low: default_active_low(),
            poll_interval: default_poll_interval(),
            debounce: None,
        }
    }
}

/// How a fresh press picks voice or morse mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePolicyKind {
    Voice,
    Morse,
    #[default]
    Gesture,
}

/// Session timing limits
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode_policy: ModePolicyKind,

    #[serde(default = "default_gesture_window", with = "seconds")]
    pub gesture_window: Duration,

    /// Ceiling for a single capture or keying session
    #[serde(default = "default_max_duration", with = "seconds")]
    pub max_duration: Duration,

    #[serde(default = "default_stt_timeout", with = "seconds")]
    pub stt_timeout: Duration,

    #[serde(default = "default_llm_timeout", with = "seconds")]
    pub llm_timeout: Duration,

    #[serde(default = "default_tts_timeout", with = "seconds")]
    pub tts_timeout: Duration,

    #[serde(default = "default_error_tone_duration", with = "seconds")]
    pub error_tone_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode_policy: ModePolicyKind::default(),
            gesture_window: default_gesture_window(),
            max_duration: default_max_duration(),
            stt_timeout: default_stt_timeout(),
            llm_timeout: default_llm_timeout(),
            tts_timeout: default_tts_timeout(),
            error_tone_duration: default_error_tone_duration(),
        }
    }
}

fn default_active_low() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(2)
}

fn default_gesture_window() -> Duration {
    Duration::from_millis(350)
}

fn default_max_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_stt_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_llm_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_tts_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_error_tone_duration() -> Duration {
    Duration::from_millis(600)
}

impl Config {
    /// Load configuration from an explicit path, `RUNE_CONFIG`, or the default file
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::resolve_path(explicit);
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml(&raw, &path)
    }

    /// Pick the config file location
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Parse and validate YAML text; `origin` is only used in error messages
    pub fn from_yaml(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be greater than zero"));
        }
        if !(1..=2).contains(&self.audio.channels) {
            return Err(invalid(
                "audio.channels",
                format!("expected 1 or 2, got {}", self.audio.channels),
            ));
        }
        if !self.morse.frequency.is_finite() || self.morse.frequency <= 0.0 {
            return Err(invalid("morse.frequency", "must be a positive number of Hz"));
        }
        if self.morse.frequency * 2.0 >= self.audio.sample_rate as f32 {
            return Err(invalid(
                "morse.frequency",
                "must be below half of audio.sample_rate",
            ));
        }
        if self.assistant.model_path.as_os_str().is_empty() {
            return Err(invalid("assistant.model_path", "must not be empty"));
        }
        if self.assistant.llm_model_name.trim().is_empty() {
            return Err(invalid("assistant.llm_model_name", "must not be empty"));
        }
        if self.assistant.voice_model_type == TtsEngine::Piper
            && self.assistant.voice_model_path.as_os_str().is_empty()
        {
            return Err(invalid(
                "assistant.voice_model_path",
                "piper needs a voice model file",
            ));
        }
        if self.debounce_window() >= self.morse.dot_duration {
            return Err(invalid(
                "button.debounce",
                "stabilization window must be shorter than morse.dot_duration",
            ));
        }
        if self.session.gesture_window >= self.session.max_duration {
            return Err(invalid(
                "session.gesture_window",
                "must be shorter than session.max_duration",
            ));
        }
        Ok(())
    }

    /// Stabilization window: explicit override, else U/5 floored at 10 ms
    pub fn debounce_window(&self) -> Duration {
        self.button
            .debounce
            .unwrap_or_else(|| (self.morse.dot_duration / 5).max(MIN_DEBOUNCE))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Durations written as (fractional) seconds
mod seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        parse(secs).map_err(D::Error::custom)
    }

    pub(super) fn parse(secs: f64) -> Result<Duration, String> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(format!("expected a positive number of seconds, got {secs}"));
        }
        Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
    }
}

mod optional_seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| super::seconds::parse(secs).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
audio:
  sample_rate: 16000
  channels: 1
  input_device: default
  output_device: "USB Audio"
ptt_pin: 17
assistant:
  model_path: models/ggml-base.en.bin
  model_type: whisper-cpp
  llm_model_name: llama3.2:1b
  voice_model_type: piper
  voice_model_path: models/en_US-lessac-medium.onnx
morse:
  dot_duration: 0.1
  frequency: 800
"#;

    pub(crate) fn sample_config() -> Config {
        Config::from_yaml(SAMPLE, Path::new("test.yml")).unwrap()
    }

    #[test]
    fn test_config_load() {
        let config = sample_config();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.ptt_pin, 17);
        assert_eq!(config.audio.input_device, DeviceSelector::Default);
        assert_eq!(
            config.audio.output_device,
            DeviceSelector::Named("USB Audio".to_string())
        );
        assert_eq!(config.assistant.model_type, SttEngine::WhisperCpp);
        assert_eq!(config.assistant.llm_engine, LlmEngine::Ollama);
        assert_eq!(config.morse.dot_duration, Duration::from_millis(100));
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config = sample_config();
        assert!(config.button.active_low);
        assert_eq!(config.session.mode_policy, ModePolicyKind::Gesture);
        assert_eq!(config.session.max_duration, Duration::from_secs(30));
        assert_eq!(config.session.llm_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_debounce_derived_from_dot_duration() {
        let config = sample_config();
        assert_eq!(config.debounce_window(), Duration::from_millis(20));

        let fast = SAMPLE.replace("dot_duration: 0.1", "dot_duration: 0.04");
        let config = Config::from_yaml(&fast, Path::new("test.yml")).unwrap();
        assert_eq!(config.debounce_window(), MIN_DEBOUNCE);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let bad = SAMPLE.replace("dot_duration: 0.1", "dot_duration: -0.1");
        let err = Config::from_yaml(&bad, Path::new("test.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let bad = SAMPLE.replace("model_type: whisper-cpp", "model_type: vosk");
        let err = Config::from_yaml(&bad, Path::new("test.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_field_rejected() {
        let bad = SAMPLE.replace("ptt_pin: 17\n", "");
        assert!(Config::from_yaml(&bad, Path::new("test.yml")).is_err());
    }

    #[test]
    fn test_channel_count_validated() {
        let bad = SAMPLE.replace("channels: 1", "channels: 6");
        let err = Config::from_yaml(&bad, Path::new("test.yml")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "audio.channels",
                ..
            }
        ));
    }

    #[test]
    fn test_debounce_must_be_shorter_than_dot() {
        let bad = format!("{SAMPLE}button:\n  debounce: 0.2\n");
        let err = Config::from_yaml(&bad, Path::new("test.yml")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "button.debounce",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::load(Some(Path::new("/nonexistent/rune.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.session.mode_policy, ModePolicyKind::Gesture);
        assert_eq!(config.session.max_duration, Duration::from_secs(30));
        assert_eq!(config.button.poll_interval, Duration::from_millis(2));
    }
}
