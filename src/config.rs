//! Engine configuration.

use crate::format::{OutputFormat, SampleFormat};

/// Frames mixed per inner chunk of the mix loop.
pub const DEFAULT_MIX_CHUNK_FRAMES: usize = 512;

/// Bytes of raw input each buffer may pull per converter pass.
pub const DEFAULT_INPUT_SCRATCH_BYTES: usize = 4096;

/// What to ask the output device for, and how to size the mixer.
///
/// ```
/// # use mischer::{EngineConfig, SampleFormat};
/// let config = EngineConfig::default()
///     .with_channels(2)
///     .with_sample_rate(44_100)
///     .with_period_frames(256);
/// assert_eq!(config.sample_format, SampleFormat::F32);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Preferred device sample format. The mixer itself always runs in f32.
    pub sample_format: SampleFormat,
    /// Preferred channel count.
    pub channels: u16,
    /// Preferred sample rate, `None` for the device default.
    pub sample_rate: Option<u32>,
    /// Device period in frames, `None` for the device default.
    pub period_frames: Option<u32>,
    /// Frames per inner mix chunk.
    pub mix_chunk_frames: usize,
    /// Raw input bytes per converter pass.
    pub input_scratch_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_format: SampleFormat::F32,
            channels: 2,
            sample_rate: None,
            period_frames: None,
            mix_chunk_frames: DEFAULT_MIX_CHUNK_FRAMES,
            input_scratch_bytes: DEFAULT_INPUT_SCRATCH_BYTES,
        }
    }
}

impl EngineConfig {
    /// Config that asks for exactly `format`.
    pub fn for_format(format: OutputFormat) -> Self {
        Self {
            sample_format: format.sample_format,
            channels: format.channels,
            sample_rate: Some(format.sample_rate),
            ..Self::default()
        }
    }

    pub fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_period_frames(mut self, frames: u32) -> Self {
        self.period_frames = Some(frames);
        self
    }

    pub fn with_mix_chunk_frames(mut self, frames: usize) -> Self {
        self.mix_chunk_frames = frames.max(1);
        self
    }

    pub fn with_input_scratch_bytes(mut self, bytes: usize) -> Self {
        self.input_scratch_bytes = bytes;
        self
    }
}
