//! cpal-backed device streams

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, StreamConfig};
use tracing::debug;

use crate::config::DeviceSelector;
use crate::error::HardwareError;

use super::backend::{
    AudioBackend, ErrorCallback, InputCallback, OutputCallback, StreamFormat, StreamGuard,
};

struct CpalStream(#[allow(dead_code)] cpal::Stream);

impl StreamGuard for CpalStream {}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Opens devices on the default cpal host
pub struct CpalBackend {
    input: DeviceSelector,
    output: DeviceSelector,
}

impl CpalBackend {
    pub fn new(input: DeviceSelector, output: DeviceSelector) -> Self {
        Self { input, output }
    }

    /// Resolve a device anew on every open so an unplugged device is retried
    fn device(&self, direction: Direction) -> Result<Device, HardwareError> {
        let host = cpal::default_host();
        let (selector, fallback) = match direction {
            Direction::Input => (&self.input, host.default_input_device()),
            Direction::Output => (&self.output, host.default_output_device()),
        };
        match selector {
            DeviceSelector::Default => fallback.ok_or_else(|| {
                HardwareError::AudioDevice("no default audio device available".to_string())
            }),
            DeviceSelector::Named(name) => {
                let mut devices = match direction {
                    Direction::Input => host.input_devices(),
                    Direction::Output => host.output_devices(),
                }
                .map_err(|e| HardwareError::AudioDevice(e.to_string()))?;
                devices
                    .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                    .ok_or_else(|| {
                        HardwareError::AudioDevice(format!("audio device `{name}` not found"))
                    })
            }
        }
    }

    fn check_format(
        device: &Device,
        direction: Direction,
        format: StreamFormat,
    ) -> Result<(), HardwareError> {
        let rate = SampleRate(format.sample_rate);
        let matches = |c: &cpal::SupportedStreamConfigRange| {
            c.channels() == format.channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        };
        let supported = match direction {
            Direction::Input => device
                .supported_input_configs()
                .map_err(|e| HardwareError::AudioDevice(e.to_string()))?
                .any(|c| matches(&c)),
            Direction::Output => device
                .supported_output_configs()
                .map_err(|e| HardwareError::AudioDevice(e.to_string()))?
                .any(|c| matches(&c)),
        };
        if supported {
            Ok(())
        } else {
            Err(HardwareError::AudioDevice(format!(
                "device does not support {} Hz with {} channel(s)",
                format.sample_rate, format.channels
            )))
        }
    }

    fn stream_config(format: StreamFormat) -> StreamConfig {
        StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Default,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn verify_devices(&self, format: StreamFormat) -> Result<(), HardwareError> {
        for direction in [Direction::Input, Direction::Output] {
            let device = self.device(direction)?;
            Self::check_format(&device, direction, format)?;
            debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = format.sample_rate,
                channels = format.channels,
                "audio device ready"
            );
        }
        Ok(())
    }

    fn open_input(
        &self,
        format: StreamFormat,
        mut on_frames: InputCallback,
        mut on_error: ErrorCallback,
    ) -> Result<Box<dyn StreamGuard>, HardwareError> {
        let device = self.device(Direction::Input)?;
        let stream = device
            .build_input_stream(
                &Self::stream_config(format),
                move |data: &[f32], _: &cpal::InputCallbackInfo| on_frames(data),
                move |err| on_error(err.to_string()),
                None,
            )
            .map_err(|e| HardwareError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| HardwareError::Stream(e.to_string()))?;
        Ok(Box::new(CpalStream(stream)))
    }

    fn open_output(
        &self,
        format: StreamFormat,
        mut fill: OutputCallback,
        mut on_error: ErrorCallback,
    ) -> Result<Box<dyn StreamGuard>, HardwareError> {
        let device = self.device(Direction::Output)?;
        let stream = device
            .build_output_stream(
                &Self::stream_config(format),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| fill(data),
                move |err| on_error(err.to_string()),
                None,
            )
            .map_err(|e| HardwareError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| HardwareError::Stream(e.to_string()))?;
        Ok(Box::new(CpalStream(stream)))
    }
}
