//! Mischer - real-time audio mixing engine
//!
//! Independently playing buffers are converted to the device format, panned,
//! scaled and summed into one interleaved stream whenever the output device
//! asks for frames.
//!
//! Design principles:
//! - The engine is an explicit, cloneable handle; there is no global state
//! - Buffers live in a slot arena behind one lock, addressed by
//!   generation-checked [`BufferId`]s
//! - The mix path never allocates and never fails: underruns are silence
//! - Devices are behind [`OutputBackend`]; offline engines need no hardware
//!
//! ## Quick Start
//!
//! ```
//! use mischer::{AudioEngine, BufferDesc, OutputFormat};
//!
//! let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));
//! let id = engine.create_buffer(BufferDesc::pcm_f32(1, 48_000, &[0.1, 0.2, 0.3, 0.4])).unwrap();
//! engine.play(id);
//!
//! let mut out = [0.0f32; 8];
//! engine.on_output_request(&mut out, 4);
//! assert_eq!(out[0], out[1]);
//! ```

mod buffer;
mod config;
pub mod converter;
mod device;
mod engine;
mod error;
mod format;
mod processor;
mod sound;
mod stream;
mod voice;
mod wave;

pub use buffer::{
    BufferData, BufferDesc, BufferUsage, FillCallback, PlaybackState, MAX_PITCH, MIN_PITCH,
};
pub use config::{EngineConfig, DEFAULT_INPUT_SCRATCH_BYTES, DEFAULT_MIX_CHUNK_FRAMES};
#[cfg(feature = "cpal_output")]
pub use device::CpalBackend;
pub use device::{OpenedDevice, OutputBackend, RenderFn};
pub use engine::{pan_gains, AudioEngine, BufferId};
pub use error::{AudioError, AudioResult};
pub use format::{OutputFormat, SampleFormat, MAX_CHANNELS};
pub use processor::{Processor, ProcessorChain, ProcessorId};
pub use sound::Sound;
pub use stream::{AudioStream, RingFeed, DEFAULT_STREAM_BUFFER_FRAMES};
pub use voice::Voice;
pub use wave::Wave;
