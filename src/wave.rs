//! Decoded PCM waveforms.
//!
//! [`Wave`] is what a decoder hands to the engine: flat interleaved PCM plus
//! its format. WAV files go through `hound` (feature `wav`), Ogg Vorbis
//! through `lewton` (feature `ogg`).

use std::path::Path;

use tracing::debug;

use crate::error::{AudioError, AudioResult};
use crate::format::SampleFormat;

/// A decoded waveform.
///
/// `data` holds `frame_count * channels` samples of `sample_size` bits each,
/// interleaved, native endianness. 8-bit data is unsigned, 16-bit signed,
/// 32-bit float. A zeroed wave (`Wave::default()`) stands for "nothing
/// decoded".
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Wave {
    pub frame_count: u32,
    pub sample_rate: u32,
    pub sample_size: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

impl Wave {
    /// Decode a file, picking the decoder from its extension.
    pub fn load(path: impl AsRef<Path>) -> AudioResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| AudioError::UnsupportedExtension(path.display().to_string()))?;

        let bytes = std::fs::read(path)?;
        let wave = Self::from_memory(extension, &bytes)?;
        debug!(
            path = %path.display(),
            frames = wave.frame_count,
            rate = wave.sample_rate,
            channels = wave.channels,
            "Wave loaded"
        );
        Ok(wave)
    }

    /// Decode an in-memory file. `extension` may carry a leading dot and is
    /// matched case-insensitively.
    #[cfg_attr(not(any(feature = "wav", feature = "ogg")), allow(unused_variables))]
    pub fn from_memory(extension: &str, bytes: &[u8]) -> AudioResult<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        match extension.as_str() {
            #[cfg(feature = "wav")]
            "wav" | "wave" => decode_wav(bytes),
            #[cfg(feature = "ogg")]
            "ogg" | "oga" => decode_ogg(bytes),
            _ => Err(AudioError::UnsupportedExtension(extension)),
        }
    }

    /// Wave over interleaved 16-bit samples.
    pub fn from_i16(channels: u32, sample_rate: u32, samples: &[i16]) -> Self {
        Self::from_raw(channels, sample_rate, 16, bytemuck::cast_slice(samples).to_vec())
    }

    /// Wave over interleaved f32 samples.
    pub fn from_f32(channels: u32, sample_rate: u32, samples: &[f32]) -> Self {
        Self::from_raw(channels, sample_rate, 32, bytemuck::cast_slice(samples).to_vec())
    }

    fn from_raw(channels: u32, sample_rate: u32, sample_size: u32, data: Vec<u8>) -> Self {
        let stride = (sample_size as usize / 8) * channels as usize;
        let frame_count = if stride == 0 { 0 } else { (data.len() / stride) as u32 };
        Self {
            frame_count,
            sample_rate,
            sample_size,
            channels,
            data,
        }
    }

    /// Whether the wave holds usable PCM with complete format information.
    pub fn is_ready(&self) -> bool {
        self.frame_count > 0
            && self.sample_rate > 0
            && self.sample_size > 0
            && self.channels > 0
            && !self.data.is_empty()
    }

    /// Sample format of `data`.
    #[inline]
    pub fn format(&self) -> SampleFormat {
        SampleFormat::from_sample_size(self.sample_size)
    }
}

#[cfg(feature = "wav")]
fn decode_wav(bytes: &[u8]) -> AudioResult<Wave> {
    use hound::{SampleFormat as WavFormat, WavReader};

    let mut reader = WavReader::new(std::io::Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels as u32;

    let wave = match (spec.sample_format, spec.bits_per_sample) {
        (WavFormat::Int, 8) => {
            // hound hands 8-bit data back as signed
            let data = reader
                .samples::<i8>()
                .map(|s| s.map(|s| (s as i16 + 128) as u8))
                .collect::<Result<Vec<u8>, _>>()?;
            Wave::from_raw(channels, spec.sample_rate, 8, data)
        }
        (WavFormat::Int, 16) => {
            let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
            Wave::from_i16(channels, spec.sample_rate, &samples)
        }
        (WavFormat::Int, bits @ (24 | 32)) => {
            let scale = 1.0 / (1u64 << (bits - 1)) as f32;
            let samples = reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?;
            Wave::from_f32(channels, spec.sample_rate, &samples)
        }
        (WavFormat::Float, 32) => {
            let samples = reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?;
            Wave::from_f32(channels, spec.sample_rate, &samples)
        }
        (format, bits) => {
            return Err(AudioError::Decode(format!(
                "unsupported WAV encoding: {:?} {}-bit",
                format, bits
            )))
        }
    };

    Ok(wave)
}

#[cfg(feature = "ogg")]
fn decode_ogg(bytes: &[u8]) -> AudioResult<Wave> {
    use lewton::inside_ogg::OggStreamReader;

    let mut srr = OggStreamReader::new(std::io::Cursor::new(bytes))?;
    let channels = srr.ident_hdr.audio_channels as u32;
    let sample_rate = srr.ident_hdr.audio_sample_rate;

    let mut samples: Vec<i16> = Vec::new();
    while let Some(packet) = srr.read_dec_packet_itl()? {
        samples.extend_from_slice(&packet);
    }

    Ok(Wave::from_i16(channels, sample_rate, &samples))
}
