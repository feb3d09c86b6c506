//! Owned buffer handles.

use crate::buffer::PlaybackState;
use crate::engine::{AudioEngine, BufferId};
use crate::processor::{Processor, ProcessorId};

/// A buffer together with the engine that owns it.
///
/// Dropping a `Voice` unregisters and frees its buffer. [`Sound`](crate::Sound)
/// and [`AudioStream`](crate::AudioStream) are built on it.
pub struct Voice {
    engine: AudioEngine,
    id: BufferId,
}

impl Voice {
    pub(crate) fn new(engine: &AudioEngine, id: BufferId) -> Self {
        Self {
            engine: engine.clone(),
            id,
        }
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    /// Restart from the first frame.
    pub fn play(&self) {
        self.engine.play(self.id)
    }

    pub fn stop(&self) {
        self.engine.stop(self.id)
    }

    pub fn pause(&self) {
        self.engine.pause(self.id)
    }

    pub fn resume(&self) {
        self.engine.resume(self.id)
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing(self.id)
    }

    pub fn set_volume(&self, volume: f32) {
        self.engine.set_volume(self.id, volume)
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.engine.set_pitch(self.id, pitch)
    }

    pub fn set_pan(&self, pan: f32) {
        self.engine.set_pan(self.id, pan)
    }

    pub fn set_looping(&self, looping: bool) {
        self.engine.set_looping(self.id, looping)
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.engine.playback_state(self.id)
    }

    /// Whether the buffer is still in the engine's mix list.
    pub fn is_registered(&self) -> bool {
        self.engine.is_registered(self.id)
    }

    pub fn attach_processor<P: Processor>(&self, processor: P) -> Option<ProcessorId> {
        self.engine.attach_processor(self.id, processor)
    }

    pub fn detach_processor(&self, processor: ProcessorId) -> Option<Box<dyn Processor>> {
        self.engine.detach_processor(self.id, processor)
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        self.engine.destroy_buffer(self.id);
    }
}

impl core::fmt::Debug for Voice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Voice").field(&self.id).finish()
    }
}
