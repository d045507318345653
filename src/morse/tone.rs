//! Sidetone keyer: renders keying intervals as PCM
//!
//! Morse responses and error indicators are played through the same
//! `AudioChannel` as synthesized speech, so they get the same mutual
//! exclusion and barge-in cancellation.

use std::f32::consts::TAU;
use std::time::Duration;

use crate::audio::AudioBuffer;

use super::codec::{KeyInterval, KeyState};

/// Attack/decay ramp that keeps tone edges from clicking
const RAMP: Duration = Duration::from_millis(5);

/// Pulses in the voice-mode error tone
const ERROR_PULSES: u32 = 3;

/// Renders tones at a fixed output format
#[derive(Debug, Clone, Copy)]
pub struct ToneKeyer {
    frequency: f32,
    sample_rate: u32,
    channels: u16,
}

impl ToneKeyer {
    pub fn new(frequency: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            frequency,
            sample_rate,
            channels,
        }
    }

    /// A single tone burst of `duration`
    pub fn emit_tone(&self, frequency: f32, duration: Duration) -> AudioBuffer {
        let frames = self.frames_for(duration);
        let ramp = self.frames_for(RAMP).min(frames / 2).max(1) as f32;
        let rate = self.sample_rate as f32;
        let mono = (0..frames)
            .map(|n| {
                let edge = n.min(frames - 1 - n) as f32;
                let envelope = (edge / ramp).min(1.0);
                0.5 * envelope * (TAU * frequency * n as f32 / rate).sin()
            })
            .collect();
        AudioBuffer::from_mono(mono, self.sample_rate, self.channels)
    }

    /// Key down spans become tone, key up spans become silence
    pub fn render(&self, intervals: &[KeyInterval]) -> AudioBuffer {
        let mut out = AudioBuffer::empty(self.sample_rate, self.channels);
        for interval in intervals {
            let span = match interval.state {
                KeyState::Down => self.emit_tone(self.frequency, interval.duration),
                KeyState::Up => self.silence(interval.duration),
            };
            out.append(&span);
        }
        out
    }

    /// Fixed-length low triple beep used when a voice session fails
    pub fn error_tone(&self, duration: Duration) -> AudioBuffer {
        let slot = duration / (ERROR_PULSES * 2 - 1);
        let mut out = AudioBuffer::empty(self.sample_rate, self.channels);
        for pulse in 0..ERROR_PULSES {
            if pulse > 0 {
                out.append(&self.silence(slot));
            }
            out.append(&self.emit_tone(self.frequency / 2.0, slot));
        }
        out
    }

    fn silence(&self, duration: Duration) -> AudioBuffer {
        AudioBuffer::from_mono(
            vec![0.0; self.frames_for(duration)],
            self.sample_rate,
            self.channels,
        )
    }

    fn frames_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * f64::from(self.sample_rate)).round() as usize
    }
}
