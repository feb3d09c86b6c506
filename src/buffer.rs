//! Playable audio buffers.
//!
//! An [`AudioBuffer`] is one sound source: its PCM (or a fill callback), the
//! converter that brings it to the output format, and its playback state.
//! Buffers live inside the engine and are addressed with a
//! [`BufferId`](crate::BufferId); every method here runs with the engine lock
//! held.

use std::sync::Arc;

use crate::converter::DataConverter;
use crate::error::{AudioError, AudioResult};
use crate::format::{OutputFormat, SampleFormat, MAX_CHANNELS};
use crate::processor::ProcessorChain;

/// Lowest pitch [`AudioEngine::set_pitch`](crate::AudioEngine::set_pitch)
/// accepts; lower values are clamped.
pub const MIN_PITCH: f32 = 1.0 / 16.0;
/// Highest accepted pitch. A mix pass reads at most this many input frames
/// per output frame.
pub const MAX_PITCH: f32 = 16.0;

/// Supplies frames on demand for callback-driven buffers.
///
/// `frames` holds `frame_count * channels` interleaved f32 samples. Return how
/// many frames were written; anything short of `frame_count` is zero-filled.
/// Runs on the audio thread with the engine lock held: never block.
pub trait FillCallback: Send + 'static {
    fn fill(&mut self, frames: &mut [f32], frame_count: usize) -> usize;
}

impl<F> FillCallback for F
where
    F: FnMut(&mut [f32], usize) -> usize + Send + 'static,
{
    #[inline]
    fn fill(&mut self, frames: &mut [f32], frame_count: usize) -> usize {
        self(frames, frame_count)
    }
}

/// How a buffer's data is produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BufferUsage {
    /// Whole waveform resident in memory.
    Static,
    /// Data produced incrementally, by sub-buffer refills or a fill callback.
    Streaming,
}

/// Data backing a buffer.
pub enum BufferData {
    /// Immutable PCM, shareable between buffers (aliases).
    Static(Arc<[u8]>),
    /// Double-buffered PCM of `frame_count` frames, refilled with
    /// [`AudioEngine::update_stream`](crate::AudioEngine::update_stream).
    Streaming { frame_count: usize },
    /// Frames pulled from a callback on every read. Always f32.
    Callback(Box<dyn FillCallback>),
}

/// Everything needed to create a buffer.
pub struct BufferDesc {
    pub format: SampleFormat,
    pub channels: usize,
    pub sample_rate: u32,
    pub data: BufferData,
}

impl BufferDesc {
    /// Static PCM buffer over `data` (interleaved, native endianness).
    pub fn pcm(
        format: SampleFormat,
        channels: usize,
        sample_rate: u32,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            format,
            channels,
            sample_rate,
            data: BufferData::Static(data.into()),
        }
    }

    /// Static buffer over interleaved f32 samples.
    pub fn pcm_f32(channels: usize, sample_rate: u32, samples: &[f32]) -> Self {
        Self::pcm(
            SampleFormat::F32,
            channels,
            sample_rate,
            bytemuck::cast_slice::<f32, u8>(samples),
        )
    }

    /// Streaming buffer with two sub-buffers of `frame_count / 2` frames each.
    pub fn streaming(
        format: SampleFormat,
        channels: usize,
        sample_rate: u32,
        frame_count: usize,
    ) -> Self {
        Self {
            format,
            channels,
            sample_rate,
            data: BufferData::Streaming { frame_count },
        }
    }

    /// Buffer whose frames come from `callback`.
    pub fn callback(channels: usize, sample_rate: u32, callback: impl FillCallback) -> Self {
        Self {
            format: SampleFormat::F32,
            channels,
            sample_rate,
            data: BufferData::Callback(Box::new(callback)),
        }
    }
}

enum BufferSource {
    Static(Arc<[u8]>),
    Streaming(Box<[u8]>),
    Callback(Box<dyn FillCallback>),
}

/// Snapshot of a buffer's playback fields.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PlaybackState {
    pub usage: BufferUsage,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_looping: bool,
    pub frame_count: usize,
    pub frame_index: usize,
    pub frames_processed: u64,
    pub sub_buffer_processed: [bool; 2],
    pub volume: f32,
    pub pitch: f32,
    pub pan: f32,
}

pub(crate) struct AudioBuffer {
    converter: DataConverter,
    /// Output rate at pitch 1.0
    base_rate_out: u32,
    source: BufferSource,
    pub(crate) processors: ProcessorChain,

    pub(crate) volume: f32,
    pitch: f32,
    pub(crate) pan: f32,

    pub(crate) is_playing: bool,
    pub(crate) is_paused: bool,
    pub(crate) is_looping: bool,

    usage: BufferUsage,
    sub_buffer_processed: [bool; 2],

    frame_count: usize,
    frame_index: usize,
    frames_processed: u64,
    /// The source ran out; the converter's tail is still to be emitted.
    source_ended: bool,
}

impl AudioBuffer {
    pub(crate) fn new(desc: BufferDesc, output: &OutputFormat) -> AudioResult<Self> {
        if desc.channels == 0 || desc.channels > MAX_CHANNELS {
            return Err(AudioError::InvalidBuffer(format!(
                "channel count {} outside 1..={}",
                desc.channels, MAX_CHANNELS
            )));
        }

        let stride = desc.format.bytes_per_frame(desc.channels);
        let (source, usage, frame_count) = match desc.data {
            BufferData::Static(data) => {
                if data.len() % stride != 0 {
                    return Err(AudioError::InvalidBuffer(format!(
                        "{} bytes is not a whole number of {}-byte frames",
                        data.len(),
                        stride
                    )));
                }
                let frames = data.len() / stride;
                if frames == 0 {
                    return Err(AudioError::InvalidBuffer("static buffer has no frames".into()));
                }
                (BufferSource::Static(data), BufferUsage::Static, frames)
            }
            BufferData::Streaming { frame_count } => {
                // Two equal halves
                let sub = (frame_count / 2).max(1);
                let frames = sub * 2;
                let silence = silence_byte(desc.format);
                let storage = vec![silence; frames * stride].into_boxed_slice();
                (BufferSource::Streaming(storage), BufferUsage::Streaming, frames)
            }
            BufferData::Callback(callback) => {
                if desc.format != SampleFormat::F32 {
                    return Err(AudioError::InvalidBuffer(
                        "callback buffers produce f32 frames".into(),
                    ));
                }
                (BufferSource::Callback(callback), BufferUsage::Streaming, 0)
            }
        };

        let converter =
            DataConverter::to_output(desc.format, desc.channels, desc.sample_rate, output)?;

        Ok(Self {
            converter,
            base_rate_out: output.sample_rate,
            source,
            processors: ProcessorChain::new(),
            volume: 1.0,
            pitch: 1.0,
            pan: 0.5,
            is_playing: false,
            is_paused: false,
            is_looping: false,
            usage,
            sub_buffer_processed: [true, true],
            frame_count,
            frame_index: 0,
            frames_processed: 0,
            source_ended: false,
        })
    }

    /// Whether this buffer's PCM storage is `storage`.
    pub(crate) fn shares_storage(&self, storage: &Arc<[u8]>) -> bool {
        match &self.source {
            BufferSource::Static(data) => Arc::ptr_eq(data, storage),
            _ => false,
        }
    }

    pub(crate) fn state(&self) -> PlaybackState {
        PlaybackState {
            usage: self.usage,
            is_playing: self.is_playing,
            is_paused: self.is_paused,
            is_looping: self.is_looping,
            frame_count: self.frame_count,
            frame_index: self.frame_index,
            frames_processed: self.frames_processed,
            sub_buffer_processed: self.sub_buffer_processed,
            volume: self.volume,
            pitch: self.pitch,
            pan: self.pan,
        }
    }

    /// Playing and not paused.
    #[inline]
    pub(crate) fn is_audible(&self) -> bool {
        self.is_playing && !self.is_paused
    }

    /// Start from the top, whatever the current position.
    pub(crate) fn play(&mut self) {
        self.is_playing = true;
        self.is_paused = false;
        self.frame_index = 0;
        self.source_ended = false;
        self.converter.reset();
    }

    pub(crate) fn stop(&mut self) {
        self.finish();
        self.converter.reset();
    }

    /// Natural end of a non-looping source, once the converter has emitted
    /// everything read. `play` resets the converter.
    fn finish(&mut self) {
        self.is_playing = false;
        self.is_paused = false;
        self.frame_index = 0;
        self.frames_processed = 0;
        self.sub_buffer_processed = [true, true];
        self.source_ended = false;
    }

    pub(crate) fn pause(&mut self) {
        self.is_paused = true;
    }

    pub(crate) fn resume(&mut self) {
        self.is_paused = false;
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub(crate) fn set_looping(&mut self, looping: bool) {
        self.is_looping = looping;
    }

    /// Clamped to [0, 1].
    pub(crate) fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(0.0, 1.0);
    }

    /// Rebind the converter's output rate to `base / pitch`, with pitch
    /// clamped to [`MIN_PITCH`, `MAX_PITCH`].
    ///
    /// Returns false (and leaves the pitch alone) for non-positive or
    /// non-finite values.
    pub(crate) fn set_pitch(&mut self, pitch: f32) -> bool {
        if !(pitch.is_finite() && pitch > 0.0) {
            return false;
        }
        let pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
        let rate_out = ((self.base_rate_out as f32 / pitch) as u32).max(1);
        let rate_in = self.converter.rate_in();
        self.converter.set_rate(rate_in, rate_out);
        self.pitch = pitch;
        true
    }

    /// Sub-buffer the producer should refill next, if any.
    fn sub_buffer_to_update(&self) -> Option<usize> {
        match self.sub_buffer_processed {
            [false, false] => None,
            [true, _] => Some(0),
            [false, true] => Some(1),
        }
    }

    pub(crate) fn is_stream_processed(&self) -> bool {
        matches!(self.source, BufferSource::Streaming(_)) && self.sub_buffer_to_update().is_some()
    }

    /// Copy `data` into the first processed sub-buffer and hand it back to the
    /// reader. Returns the number of frames written.
    pub(crate) fn update_stream(&mut self, data: &[u8]) -> AudioResult<usize> {
        let stride = self.converter.bytes_per_input_frame();
        let silence = silence_byte(self.converter.format_in());
        let sub_frames = self.frame_count / 2;

        let storage = match &mut self.source {
            BufferSource::Streaming(storage) => storage,
            _ => {
                return Err(AudioError::WrongBufferKind {
                    expected: "streaming",
                })
            }
        };

        let sub = match self.sub_buffer_processed {
            [false, false] => return Ok(0),
            [true, true] => {
                // Both drained: restart from the top
                self.frame_index = 0;
                0
            }
            [true, false] => 0,
            [false, true] => 1,
        };

        let frames = (data.len() / stride).min(sub_frames);
        let start = sub * sub_frames * stride;
        let end = start + sub_frames * stride;
        let written = frames * stride;
        storage[start..start + written].copy_from_slice(&data[..written]);
        storage[start + written..end].fill(silence);

        self.sub_buffer_processed[sub] = false;
        Ok(frames)
    }

    /// Read up to `frame_count` raw input frames into `scratch`.
    ///
    /// Static buffers return fewer frames at the end of a non-looping
    /// waveform (and stop). Streaming buffers always report the full count:
    /// an exhausted sub-buffer pair is padded with silence.
    fn read_internal(&mut self, scratch: &mut [f32], frame_count: usize) -> usize {
        let channels = self.converter.channels_in();

        if let BufferSource::Callback(callback) = &mut self.source {
            let samples = &mut scratch[..frame_count * channels];
            let supplied = callback.fill(samples, frame_count).min(frame_count);
            samples[supplied * channels..].fill(0.0);
            self.frames_processed += supplied as u64;

            if supplied < frame_count {
                #[cfg(feature = "warn_on_underrun")]
                tracing::warn!(supplied, requested = frame_count, "fill callback underrun");
                if !self.is_looping {
                    self.source_ended = true;
                    return supplied;
                }
            }
            return frame_count;
        }

        let stride = self.converter.bytes_per_input_frame();
        let silence = silence_byte(self.converter.format_in());
        let out: &mut [u8] = bytemuck::cast_slice_mut(scratch);

        let data: &[u8] = match &self.source {
            BufferSource::Static(data) => data,
            BufferSource::Streaming(data) => data,
            BufferSource::Callback(_) => unreachable!(),
        };

        let streaming = self.usage == BufferUsage::Streaming;
        let total_frames = self.frame_count;
        let sub_frames = total_frames / 2;
        let mut current_sub = if streaming {
            self.frame_index / sub_frames.max(1)
        } else {
            0
        };

        let mut frames_read = 0;
        let mut reached_end = false;

        while frames_read < frame_count {
            if streaming && self.sub_buffer_processed[current_sub] {
                break;
            }

            let frames_left_in_source = if streaming {
                sub_frames * (current_sub + 1) - self.frame_index
            } else {
                total_frames - self.frame_index
            };

            let frames_to_read = (frame_count - frames_read).min(frames_left_in_source);
            let src = self.frame_index * stride;
            let dst = frames_read * stride;
            let len = frames_to_read * stride;
            out[dst..dst + len].copy_from_slice(&data[src..src + len]);

            self.frame_index = (self.frame_index + frames_to_read) % total_frames;
            frames_read += frames_to_read;

            if frames_to_read == frames_left_in_source {
                if streaming {
                    self.sub_buffer_processed[current_sub] = true;
                    current_sub = (current_sub + 1) % 2;
                }
                if !self.is_looping {
                    reached_end = true;
                    break;
                }
            }
        }

        if streaming {
            self.frames_processed += frames_read as u64;
        }

        if frames_read < frame_count {
            out[frames_read * stride..frame_count * stride].fill(silence);
            if streaming {
                #[cfg(feature = "warn_on_underrun")]
                {
                    if !reached_end {
                        tracing::warn!(
                            missing = frame_count - frames_read,
                            "stream underrun, padding with silence"
                        );
                    }
                }
                frames_read = frame_count;
            }
        }

        self.source_ended |= reached_end;
        frames_read
    }

    /// Read up to `frame_count` frames converted to the output format into
    /// `output`, using `scratch` for raw input. Returns frames produced.
    ///
    /// Once a non-looping source runs out, the converter's tail is emitted
    /// (across calls if `output` fills up) before the buffer stops.
    pub(crate) fn read_converted(
        &mut self,
        scratch: &mut [f32],
        output: &mut [f32],
        frame_count: usize,
    ) -> usize {
        let channels_out = self.converter.channels_out();
        let scratch_capacity = match self.source {
            BufferSource::Callback(_) => scratch.len() / self.converter.channels_in(),
            _ => scratch.len() * 4 / self.converter.bytes_per_input_frame(),
        };

        let mut produced_total = 0;
        while produced_total < frame_count && !self.source_ended {
            let wanted = frame_count - produced_total;
            let needed = self.converter.required_input_frames(wanted).min(scratch_capacity);

            let read = self.read_internal(scratch, needed);
            let (_, produced) = self.converter.process(
                bytemuck::cast_slice(scratch),
                read,
                &mut output[produced_total * channels_out..],
                wanted,
            );
            produced_total += produced;

            if read < needed || !self.is_playing {
                break;
            }
            if read == 0 && produced == 0 {
                break;
            }
        }

        if self.source_ended {
            produced_total += self.converter.drain(
                &mut output[produced_total * channels_out..],
                frame_count - produced_total,
            );
            if !self.converter.has_tail() {
                self.finish();
            }
        }

        produced_total
    }

    /// Rewind a looping buffer whose source ran dry.
    pub(crate) fn rewind(&mut self) {
        self.frame_index = 0;
    }
}

/// Byte value of a silent sample.
#[inline]
fn silence_byte(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::U8 => 0x80,
        _ => 0,
    }
}
