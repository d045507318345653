//! Audio module: exclusive capture/playback over a device backend

mod backend;
mod buffer;
mod channel;
#[cfg(feature = "hardware-audio")]
mod cpal_backend;

#[cfg(test)]
pub(crate) use backend::manual::ManualBackend;
#[cfg(not(feature = "hardware-audio"))]
use backend::NullBackend;
pub use backend::{AudioBackend, StreamFormat};
pub use buffer::AudioBuffer;
pub use channel::{AudioChannel, CaptureHandle, ChannelNotice, Notifier, PlaybackHandle};
#[cfg(feature = "hardware-audio")]
pub use cpal_backend::CpalBackend;

use crate::config::AudioConfig;

/// Backend for the configured devices
#[cfg(feature = "hardware-audio")]
pub fn default_backend(config: &AudioConfig) -> Box<dyn AudioBackend> {
    Box::new(CpalBackend::new(
        config.input_device.clone(),
        config.output_device.clone(),
    ))
}

/// Backend for the configured devices
#[cfg(not(feature = "hardware-audio"))]
pub fn default_backend(_config: &AudioConfig) -> Box<dyn AudioBackend> {
    Box::new(NullBackend)
}
