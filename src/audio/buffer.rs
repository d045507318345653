//! Interleaved PCM buffer exchanged between the channel and collaborators

use std::io::{Read, Seek, Write};
use std::path::Path;
use std::time::Duration;

use rubato::{FftFixedIn, Resampler};

/// Input frames per resampler pass
const RESAMPLE_CHUNK: usize = 1024;

const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Sample rate conversion failed
#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("resampler setup failed: {0}")]
    Setup(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Interleaved `f32` samples in `[-1.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self::new(Vec::new(), sample_rate, channels)
    }

    /// Spread a mono signal across `channels`
    pub fn from_mono(mono: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        if channels <= 1 {
            return Self::new(mono, sample_rate, 1);
        }
        let samples = mono
            .iter()
            .flat_map(|s| std::iter::repeat(*s).take(usize::from(channels)))
            .collect();
        Self::new(samples, sample_rate, channels)
    }

    #[cfg(test)]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[cfg(test)]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.frames() as u128 * 1_000_000_000 / u128::from(self.sample_rate);
        Duration::from_nanos(nanos as u64)
    }

    /// Average all channels down to one
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(usize::from(self.channels))
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }

    /// Append samples of the same layout
    pub fn append(&mut self, other: &AudioBuffer) {
        debug_assert_eq!(self.channels, other.channels);
        debug_assert_eq!(self.sample_rate, other.sample_rate);
        self.samples.extend_from_slice(&other.samples);
    }

    /// Convert to another rate/channel layout
    pub fn conform(&self, sample_rate: u32, channels: u16) -> Result<AudioBuffer, ResampleError> {
        if self.sample_rate == sample_rate && self.channels == channels {
            return Ok(self.clone());
        }
        let mono = self.to_mono();
        let mono = if self.sample_rate == sample_rate {
            mono
        } else {
            resample(&mono, self.sample_rate, sample_rate)?
        };
        Ok(AudioBuffer::from_mono(mono, sample_rate, channels))
    }

    /// Encode as 16-bit PCM WAV
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_wav_to(file)
    }

    fn write_wav_to<W: Write + Seek>(&self, sink: W) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(sink, spec)?;
        for &sample in &self.samples {
            let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(scaled)?;
        }
        writer.finalize()
    }

    /// Decode a WAV file (integer or float PCM)
    pub fn read_wav(path: &Path) -> Result<Self, hound::Error> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Self::read_wav_from(file)
    }

    fn read_wav_from<R: Read>(source: R) -> Result<Self, hound::Error> {
        let mut reader = hound::WavReader::new(source)?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }
}

/// Band-limited rate conversion of a mono signal
fn resample(mono: &[f32], from: u32, to: u32) -> Result<Vec<f32>, ResampleError> {
    if mono.is_empty() {
        return Ok(Vec::new());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from as usize,
        to as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )?;
    let expected = (mono.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay);
    let mut chunks = mono.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let resampled = resampler.process(&[chunk], None)?;
        output.extend_from_slice(&resampled[0]);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let resampled = resampler.process_partial(Some(&[rest]), None)?;
        output.extend_from_slice(&resampled[0]);
    }

    // Flush the filter so the tail is not lost to the resampler delay
    while output.len() < delay + expected {
        let resampled = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if resampled[0].is_empty() {
            break;
        }
        output.extend_from_slice(&resampled[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}
