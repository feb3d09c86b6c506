//! The mixing engine: buffer registry plus the device render callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::{AudioBuffer, BufferDesc, PlaybackState};
use crate::config::EngineConfig;
use crate::device::{OpenedDevice, OutputBackend, RenderFn};
use crate::error::{AudioError, AudioResult};
use crate::format::{OutputFormat, MAX_CHANNELS};
use crate::processor::{Processor, ProcessorChain, ProcessorId};

/// Handle to a buffer owned by an [`AudioEngine`].
///
/// Handles are generation-checked: once a buffer is destroyed, its handle
/// stops matching, even if the slot is reused by a new buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferId {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    buffer: Option<AudioBuffer>,
    linked: bool,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Everything the mix callback touches, behind one lock.
struct MixerState {
    format: OutputFormat,
    ready: bool,

    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,

    processors: ProcessorChain,

    /// Converted frames of one buffer, `mix_chunk_frames * channels`
    mix_scratch: Vec<f32>,
    /// Raw input frames of one buffer
    input_scratch: Vec<f32>,
}

impl MixerState {
    fn new(format: OutputFormat, config: &EngineConfig) -> Self {
        let mut state = Self {
            format,
            ready: false,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            processors: ProcessorChain::new(),
            mix_scratch: Vec::new(),
            input_scratch: Vec::new(),
        };
        state.configure(format, config);
        state
    }

    /// Adopt a negotiated format and size the scratch buffers for it.
    fn configure(&mut self, format: OutputFormat, config: &EngineConfig) {
        let channels = (format.channels as usize).max(1);
        self.format = format;
        self.mix_scratch = vec![0.0; config.mix_chunk_frames.max(1) * channels];
        self.input_scratch = vec![0.0; (config.input_scratch_bytes / 4).max(MAX_CHANNELS)];
    }

    fn buffer_mut(&mut self, id: BufferId) -> Option<&mut AudioBuffer> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_mut())
    }

    fn slot_mut(&mut self, id: BufferId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.buffer.is_some())
    }

    fn insert(&mut self, buffer: AudioBuffer) -> BufferId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.buffer = Some(buffer);
                BufferId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    buffer: Some(buffer),
                    linked: false,
                    prev: None,
                    next: None,
                });
                BufferId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn remove(&mut self, id: BufferId) -> Option<AudioBuffer> {
        self.slot_mut(id)?;
        self.unlink(id);
        let slot = &mut self.slots[id.index as usize];
        let buffer = slot.buffer.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        buffer
    }

    /// Append to the tail of the mix list.
    fn link(&mut self, id: BufferId) -> bool {
        let tail = self.tail;
        match self.slot_mut(id) {
            Some(slot) if !slot.linked => {
                slot.linked = true;
                slot.prev = tail;
                slot.next = None;
            }
            _ => return false,
        }

        match tail {
            Some(t) => self.slots[t as usize].next = Some(id.index),
            None => self.head = Some(id.index),
        }
        self.tail = Some(id.index);
        true
    }

    fn unlink(&mut self, id: BufferId) -> bool {
        let (prev, next) = match self.slot_mut(id) {
            Some(slot) if slot.linked => {
                slot.linked = false;
                (slot.prev.take(), slot.next.take())
            }
            _ => return false,
        };

        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
        true
    }

    /// Mix every audible listed buffer into `destination`, which the caller
    /// has already zeroed.
    fn mix(&mut self, destination: &mut [f32], frame_count: usize) {
        if !self.ready {
            return;
        }

        let channels = (self.format.channels as usize).max(1);
        let frame_count = frame_count.min(destination.len() / channels);
        let chunk_frames = self.mix_scratch.len() / channels;

        let Self {
            slots,
            head,
            processors,
            mix_scratch,
            input_scratch,
            ..
        } = self;

        let mut cursor = *head;
        while let Some(index) = cursor {
            let slot = &mut slots[index as usize];
            cursor = slot.next;

            let buffer = match slot.buffer.as_mut() {
                Some(buffer) if buffer.is_audible() => buffer,
                _ => continue,
            };

            let mut frames_read = 0;
            while frames_read < frame_count {
                let frames_to_read = (frame_count - frames_read).min(chunk_frames);
                let chunk = &mut mix_scratch[..frames_to_read * channels];

                let frames_just_read = buffer.read_converted(input_scratch, chunk, frames_to_read);
                if frames_just_read > 0 {
                    let converted = &mut chunk[..frames_just_read * channels];
                    buffer.processors.run(converted, frames_just_read);

                    let out = &mut destination
                        [frames_read * channels..(frames_read + frames_just_read) * channels];
                    mix_frames(out, converted, buffer.volume, buffer.pan, channels);
                    frames_read += frames_just_read;
                }

                if !buffer.is_playing {
                    break;
                }

                if frames_just_read < frames_to_read {
                    if !buffer.is_looping {
                        buffer.stop();
                        break;
                    }
                    buffer.rewind();
                    if frames_just_read == 0 {
                        break;
                    }
                }
            }
        }

        processors.run(&mut destination[..frame_count * channels], frame_count);
    }
}

/// Per-channel stereo gains for `pan` at `volume`.
///
/// Channel 0 follows `pan`, channel 1 follows `1 - pan`, each shaped by
/// `0.5 * g * (3 - g²)`.
#[inline]
pub fn pan_gains(pan: f32, volume: f32) -> [f32; 2] {
    let left = pan;
    let right = 1.0 - left;
    [
        volume * 0.5 * left * (3.0 - left * left),
        volume * 0.5 * right * (3.0 - right * right),
    ]
}

/// Add `input * gain` onto `output`. No clamping.
#[inline]
fn mix_frames(output: &mut [f32], input: &[f32], volume: f32, pan: f32, channels: usize) {
    // Panning only applies to stereo
    if channels != 2 {
        for (out, &sample) in output.iter_mut().zip(input.iter()) {
            *out += sample * volume;
        }
        return;
    }

    let levels = pan_gains(pan, volume);
    for (out, frame) in output.chunks_exact_mut(2).zip(input.chunks_exact(2)) {
        out[0] += frame[0] * levels[0];
        out[1] += frame[1] * levels[1];
    }
}

struct EngineInner {
    state: Arc<Mutex<MixerState>>,
    device: Mutex<Option<OpenedDevice>>,
    config: EngineConfig,
    next_processor_id: AtomicU64,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if self.device.get_mut().take().is_some() {
            info!("Audio engine shut down");
        }
    }
}

/// The audio mixing engine.
///
/// Owns every buffer created through it and mixes the registered, playing
/// ones whenever the output device asks for frames.
/// Cloning is cheap; clones share the same engine.
///
/// # Creating an Instance
///
/// With a device backend (see [`OutputBackend`]):
///
/// ```no_run
/// # #[cfg(feature = "cpal_output")] {
/// # use mischer::{AudioEngine, CpalBackend, EngineConfig};
/// let engine = AudioEngine::with_backend(EngineConfig::default(), &CpalBackend::new());
/// if !engine.is_ready() {
///     eprintln!("no audio output; continuing silently");
/// }
/// # }
/// ```
///
/// Or offline, pulling frames yourself:
///
/// ```
/// # use mischer::{AudioEngine, BufferDesc, OutputFormat};
/// let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));
/// let id = engine.create_buffer(BufferDesc::pcm_f32(1, 48_000, &[0.5; 64])).unwrap();
/// engine.play(id);
///
/// let mut out = vec![0.0f32; 2 * 64];
/// engine.on_output_request(&mut out, 64);
/// ```
#[derive(Clone)]
pub struct AudioEngine {
    inner: Arc<EngineInner>,
}

impl AudioEngine {
    /// Engine with no device; the caller drives [`on_output_request`](Self::on_output_request).
    pub fn offline(format: OutputFormat) -> Self {
        let config = EngineConfig::for_format(format);
        let mut state = MixerState::new(format, &config);
        state.ready = is_usable_format(&format);
        if state.ready {
            debug!(?format, "Offline audio engine created");
        } else {
            error!(?format, "Unusable output format for offline audio engine");
        }
        Self::from_parts(state, config)
    }

    /// Open a device through `backend`.
    ///
    /// If the device cannot be opened the failure is logged and the engine is
    /// returned in a non-functional state: nothing will play, and
    /// [`create_buffer`](Self::create_buffer) reports
    /// [`AudioError::NotInitialized`].
    pub fn with_backend(config: EngineConfig, backend: &dyn OutputBackend) -> Self {
        match Self::try_with_backend(config.clone(), backend) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to initialize audio device: {}", e);
                let desired = desired_format(&config);
                Self::from_parts(MixerState::new(desired, &config), config)
            }
        }
    }

    /// Like [`with_backend`](Self::with_backend), but returns the error.
    pub fn try_with_backend(config: EngineConfig, backend: &dyn OutputBackend) -> AudioResult<Self> {
        let desired = desired_format(&config);
        let engine = Self::from_parts(MixerState::new(desired, &config), config);

        let render = engine.render_fn();
        let device = backend.open(&engine.inner.config, render)?;
        let format = device.format();

        if !is_usable_format(&format) {
            return Err(AudioError::UnsupportedFormat(format!("{:?}", format)));
        }

        {
            let mut state = engine.inner.state.lock();
            state.configure(format, &engine.inner.config);
            state.ready = true;
        }

        info!("Audio engine initialized successfully");
        info!("Audio device:         {}", device.name());
        info!("Audio format:         {:?} -> {:?}", engine.inner.config.sample_format, format.sample_format);
        info!("Audio channels:       {} -> {}", engine.inner.config.channels, format.channels);
        info!("Audio sample rate:    {:?} -> {}", engine.inner.config.sample_rate, format.sample_rate);

        *engine.inner.device.lock() = Some(device);
        Ok(engine)
    }

    /// Engine on the system's default output device.
    #[cfg(feature = "cpal_output")]
    pub fn default_output() -> Self {
        Self::with_backend(EngineConfig::default(), &crate::device::CpalBackend::new())
    }

    fn from_parts(state: MixerState, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Arc::new(Mutex::new(state)),
                device: Mutex::new(None),
                config,
                next_processor_id: AtomicU64::new(0),
            }),
        }
    }

    /// Render function for a backend. Holds only the mixer state, not the
    /// device, so the device can be dropped while it is running.
    fn render_fn(&self) -> RenderFn {
        let state = Arc::clone(&self.inner.state);
        Box::new(move |destination: &mut [f32], frame_count: usize| {
            destination.fill(0.0);
            state.lock().mix(destination, frame_count);
        })
    }

    /// Whether buffers can be created and will be heard.
    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    /// The negotiated output format, if the engine is ready.
    pub fn output_format(&self) -> Option<OutputFormat> {
        let state = self.inner.state.lock();
        state.ready.then_some(state.format)
    }

    /// The configuration this engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Stop the device and refuse new buffers.
    ///
    /// Existing buffers may still be stopped and destroyed.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.ready {
                warn!("Audio engine is not initialized");
                return;
            }
            state.ready = false;
        }

        // Dropped outside the mixer lock: closing may wait on a running callback
        let device = self.inner.device.lock().take();
        drop(device);
        info!("Audio engine shut down");
    }

    /// Fill `destination` with `frame_count` mixed frames.
    ///
    /// This is the device callback. It zero-fills `destination`, mixes every
    /// registered buffer that is playing and not paused, then runs the global
    /// processors. It never allocates. Calling it from inside a processor or
    /// fill callback deadlocks.
    pub fn on_output_request(&self, destination: &mut [f32], frame_count: usize) {
        destination.fill(0.0);
        self.inner.state.lock().mix(destination, frame_count);
    }

    /// Create a buffer and register it for mixing. It starts stopped.
    pub fn create_buffer(&self, desc: BufferDesc) -> AudioResult<BufferId> {
        let format = self.output_format().ok_or(AudioError::NotInitialized)?;
        // Converter setup happens outside the lock
        let buffer = AudioBuffer::new(desc, &format)?;

        let mut state = self.inner.state.lock();
        if !state.ready {
            return Err(AudioError::NotInitialized);
        }
        let id = state.insert(buffer);
        state.link(id);
        debug!(?id, "Audio buffer created");
        Ok(id)
    }

    /// Unregister and free a buffer. Returns false for stale handles.
    pub fn destroy_buffer(&self, id: BufferId) -> bool {
        let removed = self.inner.state.lock().remove(id);
        match removed {
            Some(buffer) => {
                // Freed outside the lock
                drop(buffer);
                debug!(?id, "Audio buffer destroyed");
                true
            }
            None => false,
        }
    }

    /// Add a buffer to the mix list. No-op if already registered, stale, or
    /// the engine is not ready.
    pub fn register(&self, id: BufferId) -> bool {
        let mut state = self.inner.state.lock();
        if !state.ready {
            return false;
        }
        state.link(id)
    }

    /// Remove a buffer from the mix list without destroying it.
    pub fn unregister(&self, id: BufferId) -> bool {
        self.inner.state.lock().unlink(id)
    }

    /// Whether the buffer is in the mix list.
    pub fn is_registered(&self, id: BufferId) -> bool {
        self.inner
            .state
            .lock()
            .slot_mut(id)
            .map(|slot| slot.linked)
            .unwrap_or(false)
    }

    /// Registered buffers, in mix order.
    pub fn registered(&self) -> Vec<BufferId> {
        let state = self.inner.state.lock();
        let mut ids = Vec::new();
        let mut cursor = state.head;
        while let Some(index) = cursor {
            let slot = &state.slots[index as usize];
            ids.push(BufferId {
                index,
                generation: slot.generation,
            });
            cursor = slot.next;
        }
        ids
    }

    /// Whether `id` refers to a live buffer.
    pub fn contains(&self, id: BufferId) -> bool {
        self.inner.state.lock().buffer_mut(id).is_some()
    }

    fn with_buffer<R>(&self, id: BufferId, f: impl FnOnce(&mut AudioBuffer) -> R) -> Option<R> {
        let mut state = self.inner.state.lock();
        match state.buffer_mut(id) {
            Some(buffer) => Some(f(buffer)),
            None => {
                warn!(?id, "Ignoring operation on a stale audio buffer handle");
                None
            }
        }
    }

    /// Start playing from the first frame.
    pub fn play(&self, id: BufferId) {
        self.with_buffer(id, AudioBuffer::play);
    }

    /// Stop and rewind.
    pub fn stop(&self, id: BufferId) {
        self.with_buffer(id, AudioBuffer::stop);
    }

    pub fn pause(&self, id: BufferId) {
        self.with_buffer(id, AudioBuffer::pause);
    }

    pub fn resume(&self, id: BufferId) {
        self.with_buffer(id, AudioBuffer::resume);
    }

    /// Playing and not paused. False for stale handles.
    pub fn is_playing(&self, id: BufferId) -> bool {
        self.inner
            .state
            .lock()
            .buffer_mut(id)
            .map(|b| b.is_audible())
            .unwrap_or(false)
    }

    /// Linear gain, 1.0 is unity.
    pub fn set_volume(&self, id: BufferId, volume: f32) {
        self.with_buffer(id, |b| b.set_volume(volume));
    }

    /// Playback rate multiplier. Changes speed along with pitch. Clamped to
    /// [`MIN_PITCH`](crate::MIN_PITCH)..=[`MAX_PITCH`](crate::MAX_PITCH).
    pub fn set_pitch(&self, id: BufferId, pitch: f32) {
        if let Some(false) = self.with_buffer(id, |b| b.set_pitch(pitch)) {
            warn!(?id, pitch, "Ignoring non-positive pitch");
        }
    }

    /// Stereo balance in [0, 1], 0.5 is centered.
    pub fn set_pan(&self, id: BufferId, pan: f32) {
        self.with_buffer(id, |b| b.set_pan(pan));
    }

    pub fn set_looping(&self, id: BufferId, looping: bool) {
        self.with_buffer(id, |b| b.set_looping(looping));
    }

    /// Snapshot of the buffer's playback fields.
    pub fn playback_state(&self, id: BufferId) -> Option<PlaybackState> {
        self.inner.state.lock().buffer_mut(id).map(|b| b.state())
    }

    /// Whether a streaming buffer has a sub-buffer waiting to be refilled.
    pub fn is_stream_processed(&self, id: BufferId) -> bool {
        self.inner
            .state
            .lock()
            .buffer_mut(id)
            .map(|b| b.is_stream_processed())
            .unwrap_or(false)
    }

    /// Refill the next processed sub-buffer of a streaming buffer with raw PCM
    /// in the buffer's own format. Returns frames written (0 if both halves
    /// are still pending).
    pub fn update_stream(&self, id: BufferId, data: &[u8]) -> AudioResult<usize> {
        let mut state = self.inner.state.lock();
        let buffer = state.buffer_mut(id).ok_or(AudioError::StaleHandle)?;
        let written = buffer.update_stream(data)?;
        if written == 0 && !data.is_empty() {
            debug!(?id, "Stream buffer not available for updating");
        }
        Ok(written)
    }

    fn next_processor_id(&self) -> ProcessorId {
        ProcessorId(self.inner.next_processor_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Run `processor` over this buffer's converted frames before they are mixed.
    pub fn attach_processor<P: Processor>(&self, id: BufferId, processor: P) -> Option<ProcessorId> {
        let pid = self.next_processor_id();
        let boxed: Box<dyn Processor> = Box::new(processor);
        self.with_buffer(id, move |b| b.processors.attach(pid, boxed))
            .map(|_| pid)
    }

    /// Detach a per-buffer processor, handing it back.
    pub fn detach_processor(&self, id: BufferId, processor: ProcessorId) -> Option<Box<dyn Processor>> {
        self.with_buffer(id, |b| b.processors.detach(processor))
            .flatten()
    }

    /// Run `processor` over the final mix.
    pub fn attach_global_processor<P: Processor>(&self, processor: P) -> ProcessorId {
        let pid = self.next_processor_id();
        let boxed: Box<dyn Processor> = Box::new(processor);
        self.inner.state.lock().processors.attach(pid, boxed);
        pid
    }

    /// Detach a global processor, handing it back.
    pub fn detach_global_processor(&self, processor: ProcessorId) -> Option<Box<dyn Processor>> {
        self.inner.state.lock().processors.detach(processor)
    }

    /// Whether a static buffer plays from `storage`.
    pub(crate) fn buffer_shares_storage(&self, id: BufferId, storage: &Arc<[u8]>) -> bool {
        self.inner
            .state
            .lock()
            .buffer_mut(id)
            .map(|b| b.shares_storage(storage))
            .unwrap_or(false)
    }
}

fn is_usable_format(format: &OutputFormat) -> bool {
    format.channels > 0 && format.channels as usize <= MAX_CHANNELS && format.sample_rate > 0
}

fn desired_format(config: &EngineConfig) -> OutputFormat {
    OutputFormat::new(
        config.sample_format,
        config.channels.max(1),
        config.sample_rate.unwrap_or(48_000),
    )
}

impl core::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AudioEngine")
            .field("ready", &state.ready)
            .field("format", &state.format)
            .field("buffers", &(state.slots.len() - state.free.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_pan_is_equal_on_both_channels() {
        let [l, r] = pan_gains(0.5, 1.0);
        assert_eq!(l, r);
        assert!((l - 0.6875).abs() < 1e-6);
    }

    #[test]
    fn hard_pan_silences_one_channel() {
        assert_eq!(pan_gains(0.0, 1.0), [0.0, 1.0]);
        assert_eq!(pan_gains(1.0, 1.0), [1.0, 0.0]);
        assert_eq!(pan_gains(0.3, 0.0), [0.0, 0.0]);
    }

    #[test]
    fn list_links_and_unlinks_in_order() {
        let format = OutputFormat::stereo_f32(48_000);
        let engine = AudioEngine::offline(format);
        let ids: Vec<_> = (0..3)
            .map(|_| engine.create_buffer(BufferDesc::pcm_f32(1, 48_000, &[0.0; 4])).unwrap())
            .collect();
        assert_eq!(engine.registered(), ids);

        assert!(engine.unregister(ids[1]));
        assert!(!engine.unregister(ids[1]));
        assert_eq!(engine.registered(), vec![ids[0], ids[2]]);

        assert!(engine.unregister(ids[0]));
        assert!(engine.unregister(ids[2]));
        assert!(engine.registered().is_empty());

        assert!(engine.register(ids[2]));
        assert!(engine.register(ids[0]));
        assert!(!engine.register(ids[0]));
        assert_eq!(engine.registered(), vec![ids[2], ids[0]]);
    }

    #[test]
    fn stale_handles_do_not_reach_reused_slots() {
        let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));
        let old = engine.create_buffer(BufferDesc::pcm_f32(1, 48_000, &[0.0; 4])).unwrap();
        assert!(engine.destroy_buffer(old));
        assert!(!engine.destroy_buffer(old));

        let new = engine.create_buffer(BufferDesc::pcm_f32(1, 48_000, &[0.0; 4])).unwrap();
        assert_eq!(new.index, old.index);
        assert_ne!(new, old);

        engine.play(old);
        assert!(!engine.is_playing(new));
        assert!(!engine.contains(old));
        assert!(engine.contains(new));
    }
}
