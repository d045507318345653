//! Exclusive capture/playback channel
//!
//! At most one stream is open at a time: a capture or a playback, never
//! both. Device callbacks never block; they report `CaptureFull`,
//! `PlaybackDone` and device faults through the notifier, which feeds the
//! session queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::HardwareError;

use super::backend::{AudioBackend, StreamFormat, StreamGuard};
use super::buffer::{AudioBuffer, ResampleError};

/// Identifies one capture started by [`AudioChannel::start_capture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHandle(u64);

/// Identifies one playback started by [`AudioChannel::start_playback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackHandle(u64);

impl CaptureHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl PlaybackHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Either kind of handle, for [`AudioChannel::cancel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHandle {
    Capture(CaptureHandle),
    Playback(PlaybackHandle),
}

impl From<CaptureHandle> for ChannelHandle {
    fn from(handle: CaptureHandle) -> Self {
        ChannelHandle::Capture(handle)
    }
}

impl From<PlaybackHandle> for ChannelHandle {
    fn from(handle: PlaybackHandle) -> Self {
        ChannelHandle::Playback(handle)
    }
}

/// Asynchronous notifications raised from device callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNotice {
    /// Capture hit the configured ceiling and stopped accumulating
    CaptureFull(CaptureHandle),
    /// Every frame of the playback has been handed to the device
    PlaybackDone(PlaybackHandle),
    /// The device reported a stream error
    DeviceFault(String),
}

/// Sink for [`ChannelNotice`]s; must not block
pub type Notifier = Arc<dyn Fn(ChannelNotice) + Send + Sync>;

/// Errors from channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("audio channel busy with {active}")]
    Busy { active: &'static str },

    #[error("handle does not match the active stream")]
    UnknownHandle,

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("playback audio cannot be converted: {0}")]
    Format(#[from] ResampleError),
}

struct CaptureShared {
    samples: Vec<f32>,
    /// Ceiling in samples (whole frames)
    limit: usize,
    full: bool,
}

struct PlaybackShared {
    samples: Vec<f32>,
    position: usize,
    cancelled: bool,
    notified: bool,
}

enum Active {
    Idle,
    Capture {
        handle: CaptureHandle,
        shared: Arc<Mutex<CaptureShared>>,
        _stream: Box<dyn StreamGuard>,
    },
    Playback {
        handle: PlaybackHandle,
        shared: Arc<Mutex<PlaybackShared>>,
        _stream: Box<dyn StreamGuard>,
    },
}

impl Active {
    fn name(&self) -> &'static str {
        match self {
            Active::Idle => "nothing",
            Active::Capture { .. } => "capture",
            Active::Playback { .. } => "playback",
        }
    }
}

/// Wraps a backend into start/stop/cancel with mutual exclusion
pub struct AudioChannel {
    backend: Box<dyn AudioBackend>,
    format: StreamFormat,
    max_capture: Duration,
    notifier: Notifier,
    active: Active,
    next_id: u64,
}

impl AudioChannel {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        format: StreamFormat,
        max_capture: Duration,
        notifier: Notifier,
    ) -> Self {
        Self {
            backend,
            format,
            max_capture,
            notifier,
            active: Active::Idle,
            next_id: 1,
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.active, Active::Capture { .. })
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.active, Active::Playback { .. })
    }

    /// Open the input device and start accumulating frames
    pub fn start_capture(&mut self) -> Result<CaptureHandle, ChannelError> {
        self.ensure_idle()?;

        let handle = CaptureHandle(self.allocate_id());
        let channels = usize::from(self.format.channels);
        let max_frames =
            (self.max_capture.as_secs_f64() * f64::from(self.format.sample_rate)).round() as usize;
        let shared = Arc::new(Mutex::new(CaptureShared {
            samples: Vec::new(),
            limit: max_frames * channels,
            full: false,
        }));

        let sink = Arc::clone(&shared);
        let notify = Arc::clone(&self.notifier);
        let on_frames = Box::new(move |data: &[f32]| {
            let Ok(mut capture) = sink.lock() else {
                return;
            };
            if capture.full {
                return;
            }
            let room = capture.limit - capture.samples.len();
            let take = data.len().min(room);
            capture.samples.extend_from_slice(&data[..take]);
            if capture.samples.len() >= capture.limit {
                capture.full = true;
                notify(ChannelNotice::CaptureFull(handle));
            }
        });

        let stream = self
            .backend
            .open_input(self.format, on_frames, self.fault_reporter())?;
        self.active = Active::Capture {
            handle,
            shared,
            _stream: stream,
        };
        info!(handle = handle.id(), "capture started");
        Ok(handle)
    }

    /// Close the input device and hand back everything captured
    pub fn stop_capture(&mut self, handle: CaptureHandle) -> Result<AudioBuffer, ChannelError> {
        match std::mem::replace(&mut self.active, Active::Idle) {
            Active::Capture {
                handle: active,
                shared,
                _stream,
            } if active == handle => {
                drop(_stream);
                let samples = shared
                    .lock()
                    .map(|mut capture| std::mem::take(&mut capture.samples))
                    .unwrap_or_default();
                let buffer =
                    AudioBuffer::new(samples, self.format.sample_rate, self.format.channels);
                info!(
                    handle = handle.id(),
                    duration_ms = buffer.duration().as_millis() as u64,
                    "capture stopped"
                );
                Ok(buffer)
            }
            other => {
                self.active = other;
                Err(ChannelError::UnknownHandle)
            }
        }
    }

    /// Open the output device and play `buffer` to completion
    pub fn start_playback(&mut self, buffer: AudioBuffer) -> Result<PlaybackHandle, ChannelError> {
        self.ensure_idle()?;

        let buffer = buffer.conform(self.format.sample_rate, self.format.channels)?;
        let handle = PlaybackHandle(self.allocate_id());
        let duration = buffer.duration();
        let shared = Arc::new(Mutex::new(PlaybackShared {
            samples: buffer.into_samples(),
            position: 0,
            cancelled: false,
            notified: false,
        }));

        let source = Arc::clone(&shared);
        let notify = Arc::clone(&self.notifier);
        let fill = Box::new(move |out: &mut [f32]| {
            let Ok(mut playback) = source.lock() else {
                out.fill(0.0);
                return;
            };
            // Cancellation and completion are observed once per chunk
            if playback.cancelled {
                out.fill(0.0);
                return;
            }
            let remaining = playback.samples.len() - playback.position;
            if remaining == 0 {
                out.fill(0.0);
                if !playback.notified {
                    playback.notified = true;
                    notify(ChannelNotice::PlaybackDone(handle));
                }
                return;
            }
            let take = out.len().min(remaining);
            let start = playback.position;
            out[..take].copy_from_slice(&playback.samples[start..start + take]);
            out[take..].fill(0.0);
            playback.position += take;
        });

        let stream = self
            .backend
            .open_output(self.format, fill, self.fault_reporter())?;
        self.active = Active::Playback {
            handle,
            shared,
            _stream: stream,
        };
        info!(
            handle = handle.id(),
            duration_ms = duration.as_millis() as u64,
            "playback started"
        );
        Ok(handle)
    }

    /// Release the output device after `PlaybackDone`
    pub fn finish_playback(&mut self, handle: PlaybackHandle) -> Result<(), ChannelError> {
        self.release(handle.into(), false)
    }

    /// Stop a capture or playback, discarding whatever has not been consumed
    pub fn cancel(&mut self, handle: impl Into<ChannelHandle>) -> Result<(), ChannelError> {
        self.release(handle.into(), true)
    }

    /// Drop whatever stream is open, regardless of handle
    pub fn reset(&mut self) {
        if !matches!(self.active, Active::Idle) {
            warn!(active = self.active.name(), "resetting audio channel");
        }
        self.active = Active::Idle;
    }

    fn release(&mut self, handle: ChannelHandle, cancelled: bool) -> Result<(), ChannelError> {
        let matches = match (&self.active, handle) {
            (Active::Capture { handle: active, .. }, ChannelHandle::Capture(h)) => *active == h,
            (Active::Playback { handle: active, .. }, ChannelHandle::Playback(h)) => *active == h,
            _ => false,
        };
        if !matches {
            return Err(ChannelError::UnknownHandle);
        }

        match std::mem::replace(&mut self.active, Active::Idle) {
            Active::Playback { shared, .. } if cancelled => {
                let discarded = shared
                    .lock()
                    .map(|mut playback| {
                        playback.cancelled = true;
                        playback.samples.len() - playback.position
                    })
                    .unwrap_or(0);
                info!(discarded_samples = discarded, "playback cancelled");
            }
            Active::Capture { .. } => debug!("capture discarded"),
            _ => debug!("playback released"),
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_idle(&self) -> Result<(), ChannelError> {
        match self.active {
            Active::Idle => Ok(()),
            ref other => Err(ChannelError::Busy {
                active: other.name(),
            }),
        }
    }

    fn fault_reporter(&self) -> Box<dyn FnMut(String) + Send> {
        let notify = Arc::clone(&self.notifier);
        Box::new(move |message| {
            warn!(%message, "audio stream error");
            notify(ChannelNotice::DeviceFault(message));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::manual::ManualBackend;
    use proptest::prelude::*;

    const FORMAT: StreamFormat = StreamFormat {
        sample_rate: 100,
        channels: 1,
    };

    fn channel_with(
        max_capture: Duration,
    ) -> (AudioChannel, ManualBackend, Arc<Mutex<Vec<ChannelNotice>>>) {
        let backend = ManualBackend::default();
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let notifier: Notifier = Arc::new(move |n| sink.lock().unwrap().push(n));
        let channel = AudioChannel::new(Box::new(backend.clone()), FORMAT, max_capture, notifier);
        (channel, backend, notices)
    }

    #[test]
    fn test_capture_returns_frames() {
        let (mut channel, backend, _) = channel_with(Duration::from_secs(1));
        let handle = channel.start_capture().unwrap();
        assert!(backend.push_input(&[0.1, 0.2]));
        assert!(backend.push_input(&[0.3]));

        let buffer = channel.stop_capture(handle).unwrap();
        assert_eq!(buffer.samples(), &[0.1, 0.2, 0.3]);
        assert!(!backend.input_open());
        assert!(!channel.is_capturing());
    }

    #[test]
    fn test_capture_stops_at_ceiling() {
        let (mut channel, backend, notices) = channel_with(Duration::from_millis(50));
        let handle = channel.start_capture().unwrap();
        backend.push_input(&[0.5; 3]);
        backend.push_input(&[0.5; 3]);
        backend.push_input(&[0.5; 3]);

        assert_eq!(
            *notices.lock().unwrap(),
            vec![ChannelNotice::CaptureFull(handle)]
        );
        let buffer = channel.stop_capture(handle).unwrap();
        assert_eq!(buffer.frames(), 5);
    }

    #[test]
    fn test_playback_rejected_while_capturing() {
        let (mut channel, _, _) = channel_with(Duration::from_secs(1));
        let _capture = channel.start_capture().unwrap();
        let err = channel
            .start_playback(AudioBuffer::new(vec![0.0; 10], 100, 1))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Busy { active: "capture" }));
    }

    #[test]
    fn test_capture_rejected_while_playing() {
        let (mut channel, _, _) = channel_with(Duration::from_secs(1));
        let _playback = channel
            .start_playback(AudioBuffer::new(vec![0.0; 10], 100, 1))
            .unwrap();
        let err = channel.start_capture().unwrap_err();
        assert!(matches!(err, ChannelError::Busy { active: "playback" }));
    }

    #[test]
    fn test_playback_done_after_last_chunk() {
        let (mut channel, backend, notices) = channel_with(Duration::from_secs(1));
        let handle = channel
            .start_playback(AudioBuffer::new(vec![0.25; 6], 100, 1))
            .unwrap();

        assert_eq!(backend.pull_output(4).unwrap(), vec![0.25; 4]);
        assert_eq!(
            backend.pull_output(4).unwrap(),
            vec![0.25, 0.25, 0.0, 0.0]
        );
        assert!(notices.lock().unwrap().is_empty());

        backend.pull_output(4).unwrap();
        backend.pull_output(4).unwrap();
        assert_eq!(
            *notices.lock().unwrap(),
            vec![ChannelNotice::PlaybackDone(handle)]
        );

        channel.finish_playback(handle).unwrap();
        assert!(!backend.output_open());
    }

    #[test]
    fn test_cancel_playback_discards_remaining() {
        let (mut channel, backend, notices) = channel_with(Duration::from_secs(1));
        let handle = channel
            .start_playback(AudioBuffer::new(vec![0.25; 100], 100, 1))
            .unwrap();
        backend.pull_output(10).unwrap();

        channel.cancel(handle).unwrap();
        assert!(!channel.is_playing());
        assert!(backend.pull_output(10).is_none());
        assert!(notices.lock().unwrap().is_empty());

        // The device is free again straight away
        channel.start_capture().unwrap();
    }

    #[test]
    fn test_stale_handle_rejected() {
        let (mut channel, _, _) = channel_with(Duration::from_secs(1));
        let first = channel.start_capture().unwrap();
        channel.cancel(first).unwrap();
        let second = channel.start_capture().unwrap();

        assert!(matches!(
            channel.stop_capture(first),
            Err(ChannelError::UnknownHandle)
        ));
        assert!(channel.is_capturing());
        assert!(channel.stop_capture(second).is_ok());
    }

    #[test]
    fn test_device_failure_leaves_channel_idle() {
        let (mut channel, backend, _) = channel_with(Duration::from_secs(1));
        backend.fail_next_open();
        assert!(matches!(
            channel.start_capture(),
            Err(ChannelError::Hardware(_))
        ));
        assert!(!channel.is_capturing());

        // Next attempt reopens the device
        channel.start_capture().unwrap();
        assert_eq!(backend.opened(), 1);
    }

    #[test]
    fn test_stream_error_reported() {
        let (mut channel, backend, notices) = channel_with(Duration::from_secs(1));
        channel.start_capture().unwrap();
        backend.raise_error("buffer overrun");
        assert_eq!(
            *notices.lock().unwrap(),
            vec![ChannelNotice::DeviceFault("buffer overrun".to_string())]
        );
    }

    #[test]
    fn test_playback_conforms_to_device_format() {
        let (mut channel, backend, _) = channel_with(Duration::from_secs(1));
        channel
            .start_playback(AudioBuffer::new(vec![0.5; 40], 100, 2))
            .unwrap();
        let out = backend.pull_output(30).unwrap();
        assert_eq!(out, vec![0.5; 20].into_iter().chain(vec![0.0; 10]).collect::<Vec<_>>());
    }

    #[derive(Debug, Clone)]
    enum Op {
        StartCapture,
        StopCapture,
        StartPlayback,
        CancelLatest,
        FinishPlayback,
        Pull,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::StartCapture),
            Just(Op::StopCapture),
            Just(Op::StartPlayback),
            Just(Op::CancelLatest),
            Just(Op::FinishPlayback),
            Just(Op::Pull),
        ]
    }

    proptest! {
        #[test]
        fn test_never_captures_and_plays_at_once(ops in prop::collection::vec(op(), 1..60)) {
            let (mut channel, backend, _) = channel_with(Duration::from_secs(1));
            let mut capture = None;
            let mut playback = None;
            for op in ops {
                match op {
                    Op::StartCapture => {
                        if let Ok(h) = channel.start_capture() {
                            capture = Some(h);
                        }
                    }
                    Op::StopCapture => {
                        if let Some(h) = capture {
                            let _ = channel.stop_capture(h);
                        }
                    }
                    Op::StartPlayback => {
                        if let Ok(h) = channel.start_playback(AudioBuffer::new(vec![0.1; 8], 100, 1)) {
                            playback = Some(h);
                        }
                    }
                    Op::CancelLatest => {
                        if let Some(h) = playback {
                            let _ = channel.cancel(h);
                        } else if let Some(h) = capture {
                            let _ = channel.cancel(h);
                        }
                    }
                    Op::FinishPlayback => {
                        if let Some(h) = playback {
                            let _ = channel.finish_playback(h);
                        }
                    }
                    Op::Pull => {
                        backend.pull_output(4);
                        backend.push_input(&[0.2; 4]);
                    }
                }
                prop_assert!(!(channel.is_capturing() && channel.is_playing()));
                prop_assert!(!(backend.input_open() && backend.output_open()));
            }
        }
    }
}
