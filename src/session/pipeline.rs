//! Collaborator chain for one session
//!
//! Voice: transcribe, query, synthesize. Morse: query, then key the answer
//! as tone. Each call runs under its own timeout; a call that overruns is
//! dropped along with its engine process. Transcription is never retried;
//! the model query is retried once.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::AudioBuffer;
use crate::collaborators::{Collaborators, LlmError};
use crate::config::SessionConfig;
use crate::error::{CollaboratorError, Stage};
use crate::morse::{to_notation, MorseCodec, ToneKeyer};

use super::state::{Mode, Response, Utterance};

/// Extra model attempts after the first failure
const LLM_RETRIES: u32 = 1;

/// Per-call limits for the three collaborators
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub stt: Duration,
    pub llm: Duration,
    pub tts: Duration,
}

impl Timeouts {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            stt: config.stt_timeout,
            llm: config.llm_timeout,
            tts: config.tts_timeout,
        }
    }

    /// Longest a pipeline run can legitimately take
    pub fn worst_case(&self) -> Duration {
        self.stt + self.llm * (1 + LLM_RETRIES) + self.tts
    }
}

/// What the controller hands over when listening ends
#[derive(Debug)]
pub enum Request {
    /// Captured speech
    Voice(AudioBuffer),
    /// Decoded morse text
    Morse(String),
}

/// A rendered answer ready for playback
#[derive(Debug)]
pub struct Reply {
    pub response: Response,
    pub audio: AudioBuffer,
}

/// Result of one pipeline run
#[derive(Debug)]
pub struct Outcome {
    /// Known once transcription (or decoding) succeeded
    pub utterance: Option<Utterance>,
    pub result: Result<Reply, CollaboratorError>,
}

/// Runs the collaborator chain; cheap to clone into a task
#[derive(Clone)]
pub struct Pipeline {
    collaborators: Collaborators,
    codec: MorseCodec,
    keyer: ToneKeyer,
    timeouts: Timeouts,
}

impl Pipeline {
    pub fn new(
        collaborators: Collaborators,
        codec: MorseCodec,
        keyer: ToneKeyer,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            collaborators,
            codec,
            keyer,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub async fn run(&self, request: Request) -> Outcome {
        let utterance = match request {
            Request::Voice(audio) => match self.transcribe(audio).await {
                Ok(text) => Utterance {
                    text,
                    source: Mode::Voice,
                },
                Err(e) => {
                    return Outcome {
                        utterance: None,
                        result: Err(e),
                    }
                }
            },
            Request::Morse(text) => Utterance {
                text,
                source: Mode::Morse,
            },
        };

        let result = self.answer(&utterance).await;
        Outcome {
            utterance: Some(utterance),
            result,
        }
    }

    async fn transcribe(&self, audio: AudioBuffer) -> Result<String, CollaboratorError> {
        let text = call(
            Stage::Transcribe,
            self.timeouts.stt,
            self.collaborators.stt.transcribe(&audio),
        )
        .await?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(CollaboratorError::EmptyUtterance);
        }
        info!(chars = text.len(), "transcribed");
        Ok(text)
    }

    async fn answer(&self, utterance: &Utterance) -> Result<Reply, CollaboratorError> {
        let response = Response {
            text: self.query(&utterance.text).await?,
        };

        let audio = match utterance.source {
            Mode::Voice => {
                call(
                    Stage::Synthesize,
                    self.timeouts.tts,
                    self.collaborators.tts.synthesize(&response.text),
                )
                .await?
            }
            Mode::Morse => {
                let intervals = self.codec.encode(&response.text);
                if intervals.is_empty() {
                    return Err(LlmError::Engine(
                        "answer has no characters that can be keyed".to_string(),
                    )
                    .into());
                }
                debug!(notation = %to_notation(&response.text), "keying answer");
                self.keyer.render(&intervals)
            }
        };

        Ok(Reply { response, audio })
    }

    async fn query(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let mut attempt = 0;
        loop {
            let request = self.collaborators.llm.query(prompt);
            match call(Stage::Query, self.timeouts.llm, request).await {
                Ok(answer) => return Ok(answer),
                Err(e) if attempt < LLM_RETRIES => {
                    attempt += 1;
                    warn!(error = %e, attempt, "model query failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Await a collaborator call with a deadline
///
/// On timeout the call's future is dropped, which kills its engine process.
async fn call<T, E, F>(stage: Stage, limit: Duration, work: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<CollaboratorError>,
{
    match tokio::time::timeout(limit, work).await {
        Err(_) => {
            warn!(%stage, after_ms = limit.as_millis() as u64, "collaborator timed out");
            Err(CollaboratorError::Timeout {
                stage,
                after: limit,
            })
        }
        Ok(result) => result.map_err(Into::into),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::collaborators::{
        CommandLanguageModel, LanguageModel, SpeechSynthesizer, SpeechToText, SttError,
        TtsError,
    };
    use crate::config::tests::sample_config;

    /// Scripted collaborators shared by the session tests
    pub(crate) struct FakeStt {
        pub text: String,
        pub delay: Duration,
    }

    #[async_trait]
    impl SpeechToText for FakeStt {
        async fn transcribe(&self, _audio: &AudioBuffer) -> Result<String, SttError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.text.clone())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeLlm {
        /// Number of leading calls that fail
        pub failures: usize,
        pub answer: String,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for FakeLlm {
        async fn query(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(LlmError::Engine("model crashed".to_string()));
            }
            Ok(self.answer.clone())
        }
    }

    pub(crate) struct FakeTts;

    #[async_trait]
    impl SpeechSynthesizer for FakeTts {
        async fn synthesize(&self, text: &str) -> Result<AudioBuffer, TtsError> {
            Ok(AudioBuffer::new(vec![0.1; text.len() * 10], 1000, 1))
        }
    }

    pub(crate) fn collaborators(stt: FakeStt, llm: Arc<FakeLlm>) -> Collaborators {
        Collaborators {
            stt: Arc::new(stt),
            llm,
            tts: Arc::new(FakeTts),
        }
    }

    pub(crate) fn quick_stt(text: &str) -> FakeStt {
        FakeStt {
            text: text.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn answering(answer: &str, failures: usize) -> Arc<FakeLlm> {
        Arc::new(FakeLlm {
            failures,
            answer: answer.to_string(),
            ..FakeLlm::default()
        })
    }

    fn pipeline(stt: FakeStt, llm: Arc<FakeLlm>, timeouts: Timeouts) -> Pipeline {
        Pipeline::new(
            collaborators(stt, llm),
            MorseCodec::new(Duration::from_millis(10)),
            ToneKeyer::new(100.0, 1000, 1),
            timeouts,
        )
    }

    fn timeouts(limit: Duration) -> Timeouts {
        Timeouts {
            stt: limit,
            llm: limit,
            tts: limit,
        }
    }

    fn speech() -> Request {
        Request::Voice(AudioBuffer::new(vec![0.0; 100], 1000, 1))
    }

    #[tokio::test]
    async fn test_voice_chain() {
        let llm = answering("hi there", 0);
        let pipeline = pipeline(quick_stt(" hello "), llm.clone(), timeouts(Duration::from_secs(5)));

        let outcome = pipeline.run(speech()).await;
        let utterance = outcome.utterance.unwrap();
        assert_eq!(utterance.text, "hello");
        assert_eq!(utterance.source, Mode::Voice);

        let reply = outcome.result.unwrap();
        assert_eq!(reply.response.text, "hi there");
        assert_eq!(reply.audio.frames(), 80);
        assert_eq!(*llm.prompts.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_model_retried_once() {
        let llm = answering("ok", 1);
        let pipeline = pipeline(quick_stt("hello"), llm.clone(), timeouts(Duration::from_secs(5)));
        let outcome = pipeline.run(speech()).await;
        assert!(outcome.result.is_ok());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_model_gives_up_after_retry() {
        let llm = answering("ok", 5);
        let pipeline = pipeline(quick_stt("hello"), llm.clone(), timeouts(Duration::from_secs(5)));
        let outcome = pipeline.run(speech()).await;
        assert!(matches!(outcome.result, Err(CollaboratorError::Llm(_))));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_transcript_fails_without_query() {
        let llm = answering("ok", 0);
        let pipeline = pipeline(quick_stt("   "), llm.clone(), timeouts(Duration::from_secs(5)));
        let outcome = pipeline.run(speech()).await;
        assert!(outcome.utterance.is_none());
        assert!(matches!(
            outcome.result,
            Err(CollaboratorError::EmptyUtterance)
        ));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_transcription_times_out() {
        let stt = FakeStt {
            text: "late".to_string(),
            delay: Duration::from_millis(500),
        };
        let pipeline = pipeline(stt, answering("ok", 0), timeouts(Duration::from_millis(30)));

        let started = std::time::Instant::now();
        let outcome = pipeline.run(speech()).await;
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(matches!(
            outcome.result,
            Err(CollaboratorError::Timeout {
                stage: Stage::Transcribe,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_morse_answer_is_keyed() {
        let llm = answering("ok", 0);
        let pipeline = pipeline(quick_stt("unused"), llm.clone(), timeouts(Duration::from_secs(5)));

        let outcome = pipeline.run(Request::Morse("SOS".to_string())).await;
        assert_eq!(outcome.utterance.unwrap().source, Mode::Morse);
        let reply = outcome.result.unwrap();

        let expected = MorseCodec::new(Duration::from_millis(10))
            .encode("OK")
            .iter()
            .map(|i| i.duration)
            .sum::<Duration>();
        assert_eq!(reply.audio.duration(), expected);

        assert_eq!(*llm.prompts.lock().unwrap(), vec!["SOS".to_string()]);
    }

    #[tokio::test]
    async fn test_unkeyable_morse_answer_fails() {
        let pipeline = pipeline(
            quick_stt("unused"),
            answering("😀", 0),
            timeouts(Duration::from_secs(5)),
        );
        let outcome = pipeline.run(Request::Morse("HI".to_string())).await;
        assert!(outcome.result.is_err());
    }

    #[tokio::test]
    async fn test_timed_out_model_is_stopped_before_retry() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("model.log");
        let script = dir.path().join("model.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho start >> {0}\nsleep 1\necho end >> {0}\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = sample_config().assistant;
        config.llm_command = Some(script.display().to_string());
        let pipeline = Pipeline::new(
            Collaborators {
                stt: Arc::new(quick_stt("unused")),
                llm: Arc::new(CommandLanguageModel::new(&config)),
                tts: Arc::new(FakeTts),
            },
            MorseCodec::new(Duration::from_millis(10)),
            ToneKeyer::new(100.0, 1000, 1),
            timeouts(Duration::from_millis(200)),
        );

        let outcome = pipeline.run(Request::Morse("HI".to_string())).await;
        assert!(matches!(
            outcome.result,
            Err(CollaboratorError::Timeout {
                stage: Stage::Query,
                ..
            })
        ));

        // Both attempts ran one after the other and neither reached the end
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "start\nstart\n");
    }

    #[test]
    fn test_worst_case_counts_retry() {
        let t = Timeouts {
            stt: Duration::from_secs(1),
            llm: Duration::from_secs(2),
            tts: Duration::from_secs(3),
        };
        assert_eq!(t.worst_case(), Duration::from_secs(8));
    }
}
