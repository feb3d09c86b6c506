//! Fully decoded sounds.

use std::path::Path;
use std::sync::Arc;

use delegate::delegate;
use tracing::debug;

use crate::buffer::{BufferDesc, PlaybackState};
use crate::converter::convert_frames;
use crate::engine::{AudioEngine, BufferId};
use crate::error::{AudioError, AudioResult};
use crate::format::SampleFormat;
use crate::voice::Voice;
use crate::wave::Wave;

/// A sound held entirely in memory, converted once to the device format.
///
/// Several sounds can play the same PCM at once through [`alias`](Self::alias);
/// each has its own position, volume, pitch and pan.
///
/// ```
/// # use mischer::{AudioEngine, OutputFormat, Sound, Wave};
/// let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));
/// let wave = Wave::from_f32(1, 24_000, &[0.25; 480]);
///
/// let shot = Sound::from_wave(&engine, &wave).unwrap();
/// let echo = shot.alias().unwrap();
/// echo.set_volume(0.3);
///
/// shot.play();
/// echo.play();
/// assert!(shot.shares_storage_with(&echo));
/// ```
pub struct Sound {
    voice: Voice,
    storage: Arc<[u8]>,
    frame_count: u32,
    sample_rate: u32,
    sample_size: u32,
    channels: u32,
}

impl Sound {
    /// Decode a file and load it.
    pub fn load(engine: &AudioEngine, path: impl AsRef<Path>) -> AudioResult<Self> {
        let wave = Wave::load(path)?;
        Self::from_wave(engine, &wave)
    }

    /// Convert `wave` to the engine's output format and create a buffer for it.
    pub fn from_wave(engine: &AudioEngine, wave: &Wave) -> AudioResult<Self> {
        if !wave.is_ready() {
            return Err(AudioError::WaveNotReady);
        }
        let output = engine.output_format().ok_or(AudioError::NotInitialized)?;

        let converted = convert_frames(
            wave.format(),
            wave.channels as usize,
            wave.sample_rate,
            &wave.data,
            &output,
        )?;
        if converted.is_empty() {
            return Err(AudioError::WaveNotReady);
        }

        let storage: Arc<[u8]> = Arc::from(bytemuck::cast_slice::<f32, u8>(&converted));
        let channels = output.channels as usize;
        let id = engine.create_buffer(BufferDesc::pcm(
            SampleFormat::F32,
            channels,
            output.sample_rate,
            Arc::clone(&storage),
        ))?;

        debug!(
            frames_in = wave.frame_count,
            frames_out = converted.len() / channels,
            "Sound loaded"
        );

        Ok(Self {
            voice: Voice::new(engine, id),
            storage,
            frame_count: (converted.len() / channels) as u32,
            sample_rate: output.sample_rate,
            sample_size: SampleFormat::F32.bits(),
            channels: output.channels as u32,
        })
    }

    /// A new sound over the same PCM, with its own buffer and playback state.
    /// Starts stopped, with this sound's volume.
    pub fn alias(&self) -> AudioResult<Self> {
        let engine = self.voice.engine();
        let id = engine.create_buffer(BufferDesc::pcm(
            SampleFormat::F32,
            self.channels as usize,
            self.sample_rate,
            Arc::clone(&self.storage),
        ))?;

        if let Some(state) = self.voice.playback_state() {
            engine.set_volume(id, state.volume);
        }

        Ok(Self {
            voice: Voice::new(engine, id),
            storage: Arc::clone(&self.storage),
            frame_count: self.frame_count,
            sample_rate: self.sample_rate,
            sample_size: self.sample_size,
            channels: self.channels,
        })
    }

    /// Unregister and free this sound's buffer. The PCM is released once no
    /// alias uses it. Same as dropping.
    pub fn destroy(self) {
        drop(self)
    }

    /// Whether the sound has PCM, a live buffer and a complete format.
    pub fn is_ready(&self) -> bool {
        self.frame_count > 0
            && self.sample_rate > 0
            && self.sample_size > 0
            && self.channels > 0
            && self.voice.engine().contains(self.voice.id())
    }

    /// Whether `other` plays from the same PCM as this sound.
    pub fn shares_storage_with(&self, other: &Sound) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
            && self
                .voice
                .engine()
                .buffer_shares_storage(other.voice.id(), &self.storage)
    }

    /// Frames of converted PCM.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bits per stored sample.
    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// The buffer handle, for direct [`AudioEngine`] calls.
    pub fn id(&self) -> BufferId {
        self.voice.id()
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    delegate! {
        to self.voice {
            /// Play from the start, restarting if already playing.
            pub fn play(&self);
            /// Stop and rewind.
            pub fn stop(&self);
            pub fn pause(&self);
            pub fn resume(&self);
            /// Playing and not paused.
            pub fn is_playing(&self) -> bool;
            pub fn set_volume(&self, volume: f32);
            pub fn set_pitch(&self, pitch: f32);
            /// 0.0 is hard to channel 1, 1.0 hard to channel 0, 0.5 centered.
            pub fn set_pan(&self, pan: f32);
            pub fn set_looping(&self, looping: bool);
            pub fn playback_state(&self) -> Option<PlaybackState>;
        }
    }
}

impl core::fmt::Debug for Sound {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sound")
            .field("id", &self.voice.id())
            .field("frame_count", &self.frame_count)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}
