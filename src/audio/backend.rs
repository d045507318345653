//! Raw device primitives behind the audio channel
//!
//! A backend only knows how to open a stream that calls back with frames.
//! Bounding, cancellation and exclusivity live in `AudioChannel`.

use crate::error::HardwareError;

/// Called with each captured chunk of interleaved samples
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Called to fill each output chunk of interleaved samples
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Called when the device reports a stream error
pub type ErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

/// Sample layout shared by capture and playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Keeps a device stream running; dropping it stops the stream
pub trait StreamGuard {}

/// Opens capture and playback streams on an audio device
pub trait AudioBackend {
    /// Check the configured devices exist and accept the format
    fn verify_devices(&self, format: StreamFormat) -> Result<(), HardwareError>;

    fn open_input(
        &self,
        format: StreamFormat,
        on_frames: InputCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn StreamGuard>, HardwareError>;

    fn open_output(
        &self,
        format: StreamFormat,
        fill: OutputCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn StreamGuard>, HardwareError>;
}

/// Backend for builds without device support; every open fails
#[cfg(not(feature = "hardware-audio"))]
pub struct NullBackend;

#[cfg(not(feature = "hardware-audio"))]
impl AudioBackend for NullBackend {
    fn verify_devices(&self, _format: StreamFormat) -> Result<(), HardwareError> {
        Err(no_audio_support())
    }

    fn open_input(
        &self,
        _format: StreamFormat,
        _on_frames: InputCallback,
        _on_error: ErrorCallback,
    ) -> Result<Box<dyn StreamGuard>, HardwareError> {
        Err(no_audio_support())
    }

    fn open_output(
        &self,
        _format: StreamFormat,
        _fill: OutputCallback,
        _on_error: ErrorCallback,
    ) -> Result<Box<dyn StreamGuard>, HardwareError> {
        Err(no_audio_support())
    }
}

#[cfg(not(feature = "hardware-audio"))]
fn no_audio_support() -> HardwareError {
    HardwareError::AudioDevice("built without the hardware-audio feature".to_string())
}
