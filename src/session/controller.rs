//! Session state machine
//!
//! Handles transitions between Idle, ListeningVoice, ListeningMorse,
//! Processing and Responding. Every input arrives through one queue and is
//! handled to completion before the next, so the state, the active audio
//! handle and the generation counter need no locking.

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioBuffer, AudioChannel, CaptureHandle, ChannelNotice, PlaybackHandle};
use crate::button::Edge;
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::error::CollaboratorError;
use crate::events::SessionEvent;
use crate::morse::{KeyInterval, MorseCodec, ToneKeyer};

use super::pipeline::{Outcome, Pipeline, Request, Timeouts};
use super::state::{Mode, ModePolicy, SessionState};
use super::Input;

/// Slack past the capture ceiling before the listening watchdog fires
const LISTEN_MARGIN: Duration = Duration::from_millis(500);

/// Slack past the worst-case collaborator time
const PROCESSING_MARGIN: Duration = Duration::from_secs(1);

/// Slack past the playback length
const RESPONSE_MARGIN: Duration = Duration::from_secs(2);

/// Progress of the tap-then-press mode gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gesture {
    Off,
    /// First press of the session, down since
    Pressed(Instant),
    /// First press was a tap, released at
    Tapped(Instant),
    /// Recognized; the second press's release is not keying
    SwallowRelease,
}

/// Key timing collected while listening for morse
#[derive(Debug, Default)]
struct Keying {
    intervals: Vec<KeyInterval>,
    down_since: Option<Instant>,
    /// Set once anything has been keyed
    up_since: Option<Instant>,
}

impl Keying {
    fn press(&mut self, at: Instant) {
        if let Some(up) = self.up_since.take() {
            self.intervals
                .push(KeyInterval::up(at.saturating_duration_since(up)));
        }
        self.down_since = Some(at);
    }

    fn release(&mut self, at: Instant) {
        if let Some(down) = self.down_since.take() {
            self.intervals
                .push(KeyInterval::down(at.saturating_duration_since(down)));
            self.up_since = Some(at);
        }
    }
}

/// Owns the session state and drives audio, codec and collaborators
pub struct SessionController {
    state: SessionState,
    state_entered_at: Instant,
    mode: Mode,
    policy: ModePolicy,
    /// Bumped for every new session; results for older ones are dropped
    generation: u64,
    session_started_at: Option<Instant>,
    gesture: Gesture,
    keying: Keying,
    capture: Option<CaptureHandle>,
    playback: Option<PlaybackHandle>,
    /// Pipeline run for the current generation while Processing
    pipeline_task: Option<JoinHandle<()>>,
    /// Watchdog for the current state; None only in Idle
    deadline: Option<Instant>,
    channel: AudioChannel,
    pipeline: Pipeline,
    codec: MorseCodec,
    keyer: ToneKeyer,
    max_duration: Duration,
    error_tone_duration: Duration,
    input_tx: mpsc::WeakSender<Input>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: &Config,
        channel: AudioChannel,
        collaborators: Collaborators,
        input_tx: &mpsc::Sender<Input>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let format = channel.format();
        let codec = MorseCodec::new(config.morse.dot_duration);
        let keyer = ToneKeyer::new(config.morse.frequency, format.sample_rate, format.channels);
        let pipeline = Pipeline::new(
            collaborators,
            codec,
            keyer,
            Timeouts::from_config(&config.session),
        );

        Self {
            state: SessionState::Idle,
            state_entered_at: Instant::now(),
            mode: Mode::Voice,
            policy: ModePolicy::from_config(
                config.session.mode_policy,
                config.session.gesture_window,
            ),
            generation: 0,
            session_started_at: None,
            gesture: Gesture::Off,
            keying: Keying::default(),
            capture: None,
            playback: None,
            pipeline_task: None,
            deadline: None,
            channel,
            pipeline,
            codec,
            keyer,
            max_duration: config.session.max_duration,
            error_tone_duration: config.session.error_tone_duration,
            input_tx: input_tx.downgrade(),
            event_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the current state's watchdog fires
    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the queue until every sender is gone
    pub async fn run(&mut self, mut input_rx: mpsc::Receiver<Input>) {
        info!(policy = ?self.policy, "session controller started in Idle state");

        loop {
            let input = match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        input = input_rx.recv() => input,
                        _ = tokio::time::sleep_until(deadline.into()) => {
                            self.on_deadline(Instant::now());
                            continue;
                        }
                    }
                }
                None => input_rx.recv().await,
            };

            match input {
                Some(input) => self.handle(input, Instant::now()),
                None => break,
            }
        }

        self.cancel_pipeline();
        self.abort_audio();
        info!("session controller stopped");
    }

    /// Apply one queued input
    pub fn handle(&mut self, input: Input, now: Instant) {
        match input {
            Input::Button(event) => match event.edge {
                Edge::Press => self.on_press(event.timestamp, now),
                Edge::Release => self.on_release(event.timestamp, now),
            },
            Input::Channel(notice) => self.on_notice(notice, now),
            Input::Completed {
                generation,
                outcome,
            } => self.on_completed(generation, outcome, now),
        }
    }

    /// Take the path the overdue completion would have taken
    pub fn on_deadline(&mut self, now: Instant) {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return,
        }

        match self.state {
            SessionState::Idle => self.deadline = None,
            SessionState::ListeningVoice => {
                if matches!(self.gesture, Gesture::Tapped(_)) {
                    debug!("no second press, keeping tap as speech");
                    self.finish_capture(false, now);
                } else {
                    warn!("capture ran past its ceiling, stopping");
                    self.finish_capture(true, now);
                }
            }
            SessionState::ListeningMorse => self.finish_keying(now),
            SessionState::Processing => {
                let after = now.saturating_duration_since(self.state_entered_at);
                warn!(after_ms = after.as_millis() as u64, "pipeline overran its deadline");
                self.fail(CollaboratorError::Stalled { after }, now);
            }
            SessionState::Responding => {
                warn!("playback never reported completion");
                self.finish_response(now);
            }
        }
    }

    fn on_press(&mut self, at: Instant, now: Instant) {
        match self.state {
            SessionState::Idle => self.begin_session(at, now),
            SessionState::ListeningVoice => match (self.gesture, self.policy.gesture_window()) {
                (Gesture::Tapped(released), Some(window))
                    if at.saturating_duration_since(released) <= window =>
                {
                    self.enter_morse_by_gesture(now);
                }
                _ => debug!("press ignored while capturing"),
            },
            SessionState::ListeningMorse => {
                self.keying.press(at);
                self.arm_morse_deadline(at);
            }
            SessionState::Processing | SessionState::Responding => {
                let during = self.state;
                info!(generation = self.generation, %during, "barge-in");
                self.emit(SessionEvent::BargeIn {
                    generation: self.generation,
                    during,
                });
                self.abort_audio();
                self.end_session(now);
                self.begin_session(at, now);
            }
        }
    }

    fn on_release(&mut self, at: Instant, now: Instant) {
        match self.state {
            SessionState::ListeningVoice => match (self.gesture, self.policy.gesture_window()) {
                (Gesture::Pressed(pressed), Some(window))
                    if at.saturating_duration_since(pressed) <= window =>
                {
                    debug!("tap, waiting for a second press");
                    self.gesture = Gesture::Tapped(at);
                    self.deadline = Some((at + window).min(self.listen_ceiling(now)));
                }
                _ => self.finish_capture(false, now),
            },
            SessionState::ListeningMorse => {
                if self.gesture == Gesture::SwallowRelease {
                    self.gesture = Gesture::Off;
                } else {
                    self.keying.release(at);
                }
                self.arm_morse_deadline(at);
            }
            state => debug!(%state, "release ignored"),
        }
    }

    fn on_notice(&mut self, notice: ChannelNotice, now: Instant) {
        match notice {
            ChannelNotice::CaptureFull(handle) => {
                if self.state == SessionState::ListeningVoice && self.capture == Some(handle) {
                    info!(
                        max_ms = self.max_duration.as_millis() as u64,
                        "capture ceiling reached"
                    );
                    self.finish_capture(true, now);
                } else {
                    debug!(handle = handle.id(), "ignoring stale capture notice");
                }
            }
            ChannelNotice::PlaybackDone(handle) => {
                if self.state == SessionState::Responding && self.playback == Some(handle) {
                    self.finish_response(now);
                } else {
                    debug!(handle = handle.id(), "ignoring stale playback notice");
                }
            }
            ChannelNotice::DeviceFault(message) => {
                self.emit(SessionEvent::DeviceFault {
                    message: message.clone(),
                });
                if self.channel.is_capturing() || self.channel.is_playing() {
                    warn!(%message, "abandoning session after device fault");
                    self.abort_audio();
                    self.end_session(now);
                }
            }
        }
    }

    fn on_completed(&mut self, generation: u64, outcome: Outcome, now: Instant) {
        if self.state != SessionState::Processing || generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding result of an abandoned session"
            );
            return;
        }

        if let Some(utterance) = outcome.utterance {
            info!(source = %utterance.source, text = %utterance.text, "utterance");
            self.emit(SessionEvent::UtteranceReady {
                generation,
                text: utterance.text,
                source: utterance.source,
            });
        }

        match outcome.result {
            Ok(reply) => {
                info!(chars = reply.response.text.len(), "response ready");
                self.emit(SessionEvent::ResponseReady {
                    generation,
                    text: reply.response.text,
                });
                self.respond(reply.audio, now);
            }
            Err(e) => self.fail(e, now),
        }
    }

    fn begin_session(&mut self, at: Instant, now: Instant) {
        self.generation += 1;
        self.keying = Keying::default();
        self.mode = self.policy.initial_mode();

        if self.mode == Mode::Voice {
            match self.channel.start_capture() {
                Ok(handle) => self.capture = Some(handle),
                Err(e) => {
                    error!(error = %e, "could not start capture, staying idle");
                    self.channel.reset();
                    self.emit(SessionEvent::DeviceFault {
                        message: e.to_string(),
                    });
                    return;
                }
            }
        }

        self.session_started_at = Some(now);
        self.emit(SessionEvent::SessionStarted {
            generation: self.generation,
            mode: self.mode,
        });

        match self.mode {
            Mode::Voice => {
                self.gesture = match self.policy.gesture_window() {
                    Some(_) => Gesture::Pressed(at),
                    None => Gesture::Off,
                };
                self.transition_to(SessionState::ListeningVoice, now);
                self.deadline = Some(self.listen_ceiling(now));
            }
            Mode::Morse => {
                self.gesture = Gesture::Off;
                self.transition_to(SessionState::ListeningMorse, now);
                self.keying.press(at);
                self.arm_morse_deadline(at);
            }
        }
    }

    fn enter_morse_by_gesture(&mut self, now: Instant) {
        if let Some(handle) = self.capture.take() {
            if let Err(e) = self.channel.cancel(handle) {
                warn!(error = %e, "could not discard gesture capture");
                self.channel.reset();
            }
        }

        info!(generation = self.generation, "mode gesture, switching to morse");
        self.mode = Mode::Morse;
        self.gesture = Gesture::SwallowRelease;
        self.keying = Keying::default();
        self.emit(SessionEvent::GestureRecognized {
            generation: self.generation,
        });
        self.transition_to(SessionState::ListeningMorse, now);
        self.arm_morse_deadline(now);
    }

    /// Stop the voice capture and hand it to the pipeline
    fn finish_capture(&mut self, auto_stopped: bool, now: Instant) {
        self.gesture = Gesture::Off;
        let Some(handle) = self.capture.take() else {
            self.end_session(now);
            return;
        };

        match self.channel.stop_capture(handle) {
            Ok(audio) => {
                self.emit(SessionEvent::CaptureStopped {
                    generation: self.generation,
                    duration_ms: audio.duration().as_millis() as u64,
                    auto_stopped,
                });
                self.start_processing(Request::Voice(audio), now);
            }
            Err(e) => {
                error!(error = %e, "could not stop capture");
                self.channel.reset();
                self.end_session(now);
            }
        }
    }

    /// The idle gap elapsed: decode what was keyed
    fn finish_keying(&mut self, now: Instant) {
        // A key still held at the ceiling counts as released now
        self.keying.release(now);
        let keying = std::mem::take(&mut self.keying);

        if keying.intervals.is_empty() {
            info!("nothing keyed, leaving morse mode");
            self.end_session(now);
            return;
        }

        let decoded = self.codec.decode(&keying.intervals);
        for skipped in &decoded.errors {
            warn!(error = %skipped, "skipped morse character");
        }
        if decoded.text.is_empty() {
            self.fail(CollaboratorError::EmptyUtterance, now);
            return;
        }

        info!(text = %decoded.text, "morse message decoded");
        self.start_processing(Request::Morse(decoded.text), now);
    }

    fn start_processing(&mut self, request: Request, now: Instant) {
        self.transition_to(SessionState::Processing, now);
        self.deadline = Some(now + self.pipeline.timeouts().worst_case() + PROCESSING_MARGIN);

        let generation = self.generation;
        let pipeline = self.pipeline.clone();
        let input_tx = self.input_tx.clone();
        self.pipeline_task = Some(tokio::spawn(async move {
            let outcome = pipeline.run(request).await;
            let Some(input_tx) = input_tx.upgrade() else {
                return;
            };
            if input_tx
                .send(Input::Completed {
                    generation,
                    outcome,
                })
                .await
                .is_err()
            {
                debug!(generation, "session queue closed before result arrived");
            }
        }));
    }

    /// Drop an unfinished pipeline run along with its engine processes
    fn cancel_pipeline(&mut self) {
        if let Some(task) = self.pipeline_task.take() {
            if !task.is_finished() {
                debug!(generation = self.generation, "cancelling pipeline run");
                task.abort();
            }
        }
    }

    /// Render the mode's error indicator in place of a response
    fn fail(&mut self, err: CollaboratorError, now: Instant) {
        warn!(generation = self.generation, error = %err, "session failed");
        self.emit(SessionEvent::SessionFailed {
            generation: self.generation,
            error: err.to_string(),
        });

        let indicator = match self.mode {
            Mode::Voice => self.keyer.error_tone(self.error_tone_duration),
            Mode::Morse => self.keyer.render(&self.codec.error_pattern()),
        };
        self.respond(indicator, now);
    }

    fn respond(&mut self, audio: AudioBuffer, now: Instant) {
        let length = audio.duration();
        match self.channel.start_playback(audio) {
            Ok(handle) => {
                self.playback = Some(handle);
                self.transition_to(SessionState::Responding, now);
                self.deadline = Some(now + length + RESPONSE_MARGIN);
            }
            Err(e) => {
                error!(error = %e, "could not start playback");
                self.channel.reset();
                self.emit(SessionEvent::DeviceFault {
                    message: e.to_string(),
                });
                self.end_session(now);
            }
        }
    }

    fn finish_response(&mut self, now: Instant) {
        if let Some(handle) = self.playback.take() {
            if let Err(e) = self.channel.finish_playback(handle) {
                warn!(error = %e, "playback already released");
                self.channel.reset();
            }
        }
        self.end_session(now);
    }

    /// Drop whatever stream the session holds
    fn abort_audio(&mut self) {
        let result = match (self.capture.take(), self.playback.take()) {
            (Some(capture), _) => self.channel.cancel(capture),
            (None, Some(playback)) => self.channel.cancel(playback),
            (None, None) => Ok(()),
        };
        if let Err(e) = result {
            warn!(error = %e, "cancel failed, resetting channel");
            self.channel.reset();
        }
    }

    fn end_session(&mut self, now: Instant) {
        self.gesture = Gesture::Off;
        self.keying = Keying::default();
        if let Some(started) = self.session_started_at.take() {
            self.emit(SessionEvent::SessionFinished {
                generation: self.generation,
                duration_ms: now.saturating_duration_since(started).as_millis() as u64,
            });
        }
        self.transition_to(SessionState::Idle, now);
    }

    fn listen_ceiling(&self, now: Instant) -> Instant {
        self.session_started_at.unwrap_or(now) + self.max_duration + LISTEN_MARGIN
    }

    /// End of message after an idle gap; a held key is bounded by the ceiling
    fn arm_morse_deadline(&mut self, reference: Instant) {
        let gap = self.codec.end_of_message_gap();
        let deadline = match (self.keying.down_since, self.keying.up_since) {
            (Some(down), _) => down + self.max_duration,
            (None, Some(up)) => up + gap,
            (None, None) => reference + gap,
        };
        self.deadline = Some(deadline);
    }

    fn transition_to(&mut self, new_state: SessionState, now: Instant) {
        let old_state = self.state;
        self.deadline = None;
        if new_state == old_state {
            return;
        }
        if old_state == SessionState::Processing {
            self.cancel_pipeline();
        }

        let duration_ms = now
            .saturating_duration_since(self.state_entered_at)
            .as_millis() as u64;
        info!(
            from = %old_state,
            to = %new_state,
            generation = self.generation,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.state_entered_at = now;
        self.emit(SessionEvent::StateChanged {
            from: old_state,
            to: new_state,
        });
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}
