//! Sample formats and the negotiated output format.

use dasp_sample::Sample;

/// Largest channel count a buffer or device may use.
pub const MAX_CHANNELS: usize = 8;

/// Storage format of one PCM sample.
///
/// PCM data is kept as raw bytes in native endianness, the way decoders hand
/// it over.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SampleFormat {
    /// Unsigned 8-bit, 128 is silence.
    U8,
    /// Signed 16-bit.
    S16,
    /// Signed 32-bit.
    S32,
    /// 32-bit float in [-1.0, 1.0].
    F32,
}

impl SampleFormat {
    /// Bytes per sample.
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }

    /// Bytes per frame for `channels` interleaved channels.
    #[inline]
    pub fn bytes_per_frame(self, channels: usize) -> usize {
        self.bytes_per_sample() * channels
    }

    /// Bit depth, as reported in [`Wave::sample_size`](crate::Wave).
    #[inline]
    pub fn bits(self) -> u32 {
        self.bytes_per_sample() as u32 * 8
    }

    /// Format for a decoded bit depth: 8 → `U8`, 16 → `S16`, anything else → `F32`.
    pub fn from_sample_size(bits: u32) -> Self {
        match bits {
            8 => SampleFormat::U8,
            16 => SampleFormat::S16,
            _ => SampleFormat::F32,
        }
    }

    /// Decode the sample starting at `bytes[0]` into f32.
    ///
    /// `bytes` must hold at least [`bytes_per_sample`](Self::bytes_per_sample) bytes.
    #[inline]
    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::U8 => bytes[0].to_sample::<f32>(),
            SampleFormat::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]).to_sample::<f32>(),
            SampleFormat::S32 => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_sample::<f32>()
            }
            SampleFormat::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// The format triple an output device negotiates.
///
/// The mixer always works in interleaved f32 with `channels` channels at
/// `sample_rate`; `sample_format` is what the device consumes after the
/// backend's final conversion.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OutputFormat {
    pub sample_format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
}

impl OutputFormat {
    pub fn new(sample_format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            sample_format,
            channels,
            sample_rate,
        }
    }

    /// Stereo f32 at the given rate.
    pub fn stereo_f32(sample_rate: u32) -> Self {
        Self::new(SampleFormat::F32, 2, sample_rate)
    }

    /// Interleaved f32 samples needed for `frames` frames.
    #[inline]
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }
}
