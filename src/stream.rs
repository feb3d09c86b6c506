//! Streamed audio: double-buffered PCM refills and callback-fed buffers.

use delegate::delegate;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::buffer::{BufferDesc, FillCallback, PlaybackState};
use crate::engine::{AudioEngine, BufferId};
use crate::error::{AudioError, AudioResult};
use crate::format::SampleFormat;
use crate::voice::Voice;

/// Sub-buffer size used when a stream is created with `0` frames.
pub const DEFAULT_STREAM_BUFFER_FRAMES: usize = 4096;

/// A stream of PCM produced while it plays.
///
/// Refilled streams hold two sub-buffers: while the engine plays one, the
/// producer refills the other with [`update`](Self::update) as soon as
/// [`is_processed`](Self::is_processed) says it has drained.
///
/// ```
/// # use mischer::{AudioEngine, AudioStream, OutputFormat, SampleFormat};
/// let engine = AudioEngine::offline(OutputFormat::stereo_f32(44_100));
/// let stream = AudioStream::new(&engine, SampleFormat::S16, 2, 44_100, 1024).unwrap();
///
/// let block = vec![0i16; 1024 * 2];
/// while stream.is_processed() {
///     stream.update(&block).unwrap();
/// }
/// stream.play();
/// ```
pub struct AudioStream {
    voice: Voice,
    format: SampleFormat,
    channels: usize,
    sample_rate: u32,
    sub_buffer_frames: usize,
}

impl AudioStream {
    /// Create a looping stream with sub-buffers of `sub_buffer_frames` frames
    /// ([`DEFAULT_STREAM_BUFFER_FRAMES`] if zero).
    pub fn new(
        engine: &AudioEngine,
        format: SampleFormat,
        channels: usize,
        sample_rate: u32,
        sub_buffer_frames: usize,
    ) -> AudioResult<Self> {
        let sub_buffer_frames = if sub_buffer_frames == 0 {
            DEFAULT_STREAM_BUFFER_FRAMES
        } else {
            sub_buffer_frames
        };

        let id = engine.create_buffer(BufferDesc::streaming(
            format,
            channels,
            sample_rate,
            sub_buffer_frames * 2,
        ))?;
        engine.set_looping(id, true);

        Ok(Self {
            voice: Voice::new(engine, id),
            format,
            channels,
            sample_rate,
            sub_buffer_frames,
        })
    }

    /// Create a stream that pulls f32 frames from `callback` as the engine
    /// needs them. It loops, so a callback that runs short plays silence
    /// rather than ending the stream.
    pub fn from_callback(
        engine: &AudioEngine,
        channels: usize,
        sample_rate: u32,
        callback: impl FillCallback,
    ) -> AudioResult<Self> {
        let id = engine.create_buffer(BufferDesc::callback(channels, sample_rate, callback))?;
        engine.set_looping(id, true);

        Ok(Self {
            voice: Voice::new(engine, id),
            format: SampleFormat::F32,
            channels,
            sample_rate,
            sub_buffer_frames: 0,
        })
    }

    /// Whether a sub-buffer is waiting for [`update`](Self::update).
    pub fn is_processed(&self) -> bool {
        self.voice.engine().is_stream_processed(self.voice.id())
    }

    /// Copy `samples` (interleaved, in the stream's format) into the next
    /// drained sub-buffer. Returns frames written; `0` if neither half has
    /// drained yet. Data beyond one sub-buffer is ignored, and a short block is
    /// padded with silence.
    pub fn update<T: bytemuck::Pod>(&self, samples: &[T]) -> AudioResult<usize> {
        if std::mem::size_of::<T>() != self.format.bytes_per_sample() {
            return Err(AudioError::InvalidBuffer(format!(
                "{}-byte samples do not match {:?}",
                std::mem::size_of::<T>(),
                self.format
            )));
        }
        self.voice
            .engine()
            .update_stream(self.voice.id(), bytemuck::cast_slice(samples))
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per sub-buffer, 0 for callback streams.
    pub fn sub_buffer_frames(&self) -> usize {
        self.sub_buffer_frames
    }

    pub fn id(&self) -> BufferId {
        self.voice.id()
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    delegate! {
        to self.voice {
            pub fn play(&self);
            pub fn stop(&self);
            pub fn pause(&self);
            pub fn resume(&self);
            pub fn is_playing(&self) -> bool;
            pub fn set_volume(&self, volume: f32);
            pub fn set_pitch(&self, pitch: f32);
            pub fn set_pan(&self, pan: f32);
            pub fn set_looping(&self, looping: bool);
            pub fn playback_state(&self) -> Option<PlaybackState>;
        }
    }
}

impl core::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AudioStream")
            .field("id", &self.voice.id())
            .field("format", &self.format)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Fill callback fed through a lock-free ring buffer.
///
/// A decoder or synth thread pushes interleaved f32 samples into the
/// [`Producer`]; the engine pops whole frames on the audio thread. When the
/// ring runs dry the rest of the request is silence.
///
/// ```
/// # use mischer::{AudioEngine, AudioStream, OutputFormat, RingFeed};
/// let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));
/// let (mut producer, feed) = RingFeed::new(4096, 2);
/// let stream = AudioStream::from_callback(&engine, 2, 48_000, feed).unwrap();
///
/// for _ in 0..256 {
///     let _ = producer.push(0.1);
/// }
/// stream.play();
/// ```
pub struct RingFeed {
    consumer: Consumer<f32>,
    channels: usize,
}

impl RingFeed {
    /// Ring with room for `capacity_frames` frames of `channels` channels.
    pub fn new(capacity_frames: usize, channels: usize) -> (Producer<f32>, RingFeed) {
        let channels = channels.max(1);
        let (producer, consumer) = RingBuffer::new(capacity_frames.max(1) * channels);
        (producer, RingFeed { consumer, channels })
    }

    /// Wrap an existing consumer.
    pub fn from_consumer(consumer: Consumer<f32>, channels: usize) -> Self {
        Self {
            consumer,
            channels: channels.max(1),
        }
    }

    /// Whole frames waiting in the ring.
    pub fn frames_available(&self) -> usize {
        self.consumer.slots() / self.channels
    }
}

impl FillCallback for RingFeed {
    fn fill(&mut self, frames: &mut [f32], frame_count: usize) -> usize {
        let available = self.frames_available().min(frame_count);
        for sample in frames[..available * self.channels].iter_mut() {
            // Whole frames were counted above, so pops cannot fail
            *sample = self.consumer.pop().unwrap_or(0.0);
        }
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_feed_yields_whole_frames_only() {
        let (mut producer, mut feed) = RingFeed::new(8, 2);
        for s in [0.1, 0.2, 0.3, 0.4, 0.5] {
            producer.push(s).unwrap();
        }

        let mut frames = [0.0f32; 6];
        assert_eq!(feed.fill(&mut frames, 3), 2);
        assert_eq!(&frames[..4], &[0.1, 0.2, 0.3, 0.4]);
        // The odd sample waits for its partner
        assert_eq!(feed.frames_available(), 0);

        producer.push(0.6).unwrap();
        assert_eq!(feed.fill(&mut frames, 3), 1);
        assert_eq!(&frames[..2], &[0.5, 0.6]);
    }
}
