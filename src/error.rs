//! Error types for engine setup, buffer creation and decoding.
//!
//! The mix path never produces these: underruns degrade to silence and stale
//! handles are ignored. Errors only surface from control-thread operations.

use thiserror::Error;

/// Errors that can occur outside the real-time mix path.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The engine has no working output (device init failed or it was shut down).
    #[error("Audio engine is not initialized")]
    NotInitialized,

    /// No output device is available.
    #[error("No audio output device found")]
    NoDevice,

    /// The output backend failed to open or start.
    #[error("Audio backend error: {0}")]
    Backend(String),

    /// The device negotiated a sample format the engine cannot drive.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// A buffer description was rejected.
    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),

    /// The handle no longer refers to a live buffer.
    #[error("Stale or unknown buffer handle")]
    StaleHandle,

    /// The operation needs a buffer of a different kind (e.g. `update` on a static buffer).
    #[error("Wrong buffer kind: expected {expected}")]
    WrongBufferKind { expected: &'static str },

    /// Reading a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The decoder rejected the data.
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    /// No decoder is compiled in for the file extension.
    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),

    /// A decoded wave was empty or incomplete.
    #[error("Wave is not ready (empty or missing format information)")]
    WaveNotReady,
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(feature = "wav")]
impl From<hound::Error> for AudioError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => AudioError::Io(io),
            other => AudioError::Decode(other.to_string()),
        }
    }
}

#[cfg(feature = "ogg")]
impl From<lewton::VorbisError> for AudioError {
    fn from(e: lewton::VorbisError) -> Self {
        AudioError::Decode(e.to_string())
    }
}
