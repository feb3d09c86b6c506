//! Output device abstraction.
//!
//! The engine only needs two things from hardware: the negotiated output
//! format, and a thread that periodically calls a render function with a
//! destination buffer. [`OutputBackend`] captures that contract;
//! [`CpalBackend`] (feature `cpal_output`) implements it over CPAL.
//!
//! # Example: List and Select a Device
//!
//! ```no_run
//! # #[cfg(feature = "cpal_output")] {
//! use mischer::{AudioEngine, CpalBackend, EngineConfig};
//!
//! for name in CpalBackend::list_outputs() {
//!     println!("{}", name);
//! }
//!
//! let backend = CpalBackend::named("pulse");
//! let engine = AudioEngine::with_backend(EngineConfig::default(), &backend);
//! # }
//! ```

use crate::config::EngineConfig;
use crate::error::AudioResult;
use crate::format::OutputFormat;

/// The render function a backend calls from its audio thread.
///
/// Arguments are the interleaved f32 destination and the number of frames it
/// holds.
pub type RenderFn = Box<dyn FnMut(&mut [f32], usize) + Send + 'static>;

/// A device that was opened and is running.
///
/// Dropping it stops the device.
pub struct OpenedDevice {
    format: OutputFormat,
    name: String,
    _keep_alive: Box<dyn Send>,
}

impl OpenedDevice {
    /// `keep_alive` owns whatever keeps the stream running (a stream object,
    /// a thread guard); it is dropped when the device is closed.
    pub fn new(format: OutputFormat, name: impl Into<String>, keep_alive: impl Send + 'static) -> Self {
        Self {
            format,
            name: name.into(),
            _keep_alive: Box::new(keep_alive),
        }
    }

    #[inline]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An output device driver.
pub trait OutputBackend {
    /// Open a device as close to `config` as possible, start it, and call
    /// `render` from the device's audio thread from then on.
    ///
    /// `render` may be called before `open` returns; the engine answers with
    /// silence until it has seen the negotiated format.
    fn open(&self, config: &EngineConfig, render: RenderFn) -> AudioResult<OpenedDevice>;
}

#[cfg(feature = "cpal_output")]
pub use self::cpal_backend::CpalBackend;

#[cfg(feature = "cpal_output")]
mod cpal_backend {
    use std::sync::mpsc;
    use std::thread::JoinHandle;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SizedSample, SupportedStreamConfig};
    use tracing::{error, info};

    use super::{OpenedDevice, OutputBackend, RenderFn};
    use crate::config::EngineConfig;
    use crate::error::{AudioError, AudioResult};
    use crate::format::{OutputFormat, SampleFormat};

    /// Frames converted per chunk inside the device callback.
    const CALLBACK_CHUNK_FRAMES: usize = 1024;

    /// CPAL output backend.
    ///
    /// Uses the host's default output device unless a device name is given.
    #[derive(Clone, Debug, Default)]
    pub struct CpalBackend {
        device_name: Option<String>,
    }

    impl CpalBackend {
        /// Default output device of the default host.
        pub fn new() -> Self {
            Self::default()
        }

        /// Output device with this name.
        pub fn named(name: impl Into<String>) -> Self {
            Self {
                device_name: Some(name.into()),
            }
        }

        /// Names of all output devices of the default host.
        ///
        /// Returns an empty list if enumeration fails.
        pub fn list_outputs() -> Vec<String> {
            let host = cpal::default_host();
            host.output_devices()
                .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
                .unwrap_or_default()
        }

        fn find_device(&self) -> AudioResult<cpal::Device> {
            let host = cpal::default_host();
            match &self.device_name {
                None => host.default_output_device().ok_or(AudioError::NoDevice),
                Some(name) => host
                    .output_devices()
                    .map_err(|e| AudioError::Backend(e.to_string()))?
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or(AudioError::NoDevice),
            }
        }
    }

    fn to_cpal_format(format: SampleFormat) -> cpal::SampleFormat {
        match format {
            SampleFormat::U8 => cpal::SampleFormat::U8,
            SampleFormat::S16 => cpal::SampleFormat::I16,
            SampleFormat::S32 => cpal::SampleFormat::I32,
            SampleFormat::F32 => cpal::SampleFormat::F32,
        }
    }

    fn from_cpal_format(format: cpal::SampleFormat) -> AudioResult<SampleFormat> {
        match format {
            cpal::SampleFormat::U8 => Ok(SampleFormat::U8),
            cpal::SampleFormat::I16 => Ok(SampleFormat::S16),
            cpal::SampleFormat::I32 => Ok(SampleFormat::S32),
            cpal::SampleFormat::F32 => Ok(SampleFormat::F32),
            other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        }
    }

    /// Pick the supported config closest to what was asked for, falling back
    /// to the device default.
    fn negotiate(device: &cpal::Device, config: &EngineConfig) -> AudioResult<SupportedStreamConfig> {
        let default = device
            .default_output_config()
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        let rate = config.sample_rate.unwrap_or(default.sample_rate().0);
        let wanted_format = to_cpal_format(config.sample_format);

        let exact = device
            .supported_output_configs()
            .map_err(|e| AudioError::Backend(e.to_string()))?
            .find(|c| {
                c.channels() == config.channels
                    && c.sample_format() == wanted_format
                    && c.min_sample_rate().0 <= rate
                    && rate <= c.max_sample_rate().0
            });

        Ok(match exact {
            Some(range) => range.with_sample_rate(cpal::SampleRate(rate)),
            None => default,
        })
    }

    /// Owns the stream thread; dropping it stops the stream.
    struct StreamThread {
        stop: Option<mpsc::Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl Drop for StreamThread {
        fn drop(&mut self) {
            drop(self.stop.take());
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    impl OutputBackend for CpalBackend {
        fn open(&self, config: &EngineConfig, render: RenderFn) -> AudioResult<OpenedDevice> {
            let device = self.find_device()?;
            let name = device.name().unwrap_or_else(|_| "Unknown".into());

            let supported = negotiate(&device, config)?;
            let sample_format = from_cpal_format(supported.sample_format())?;
            let mut stream_config = supported.config();
            if let Some(frames) = config.period_frames {
                stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
            }

            let format = OutputFormat::new(
                sample_format,
                stream_config.channels,
                stream_config.sample_rate.0,
            );

            // cpal::Stream is not Send everywhere; it lives on its own thread
            let (ready_tx, ready_rx) = mpsc::sync_channel::<AudioResult<()>>(1);
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            let cpal_format = supported.sample_format();

            let thread = std::thread::Builder::new()
                .name("mischer-output".into())
                .spawn(move || {
                    let stream = match build_stream(&device, cpal_format, &stream_config, render) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(AudioError::Backend(e.to_string())));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::Backend(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    // Park until the guard hangs up
                    let _ = stop_rx.recv();
                    drop(stream);
                })?;

            let guard = StreamThread {
                stop: Some(stop_tx),
                thread: Some(thread),
            };

            ready_rx
                .recv()
                .map_err(|_| AudioError::Backend("output thread exited during startup".into()))??;

            info!(device = name.as_str(), ?format, "Opened cpal output device");
            Ok(OpenedDevice::new(format, name, guard))
        }
    }

    fn build_stream(
        device: &cpal::Device,
        sample_format: cpal::SampleFormat,
        config: &cpal::StreamConfig,
        render: RenderFn,
    ) -> Result<cpal::Stream, cpal::BuildStreamError> {
        match sample_format {
            cpal::SampleFormat::F32 => build_typed_stream::<f32>(device, config, render),
            cpal::SampleFormat::I16 => build_typed_stream::<i16>(device, config, render),
            cpal::SampleFormat::I32 => build_typed_stream::<i32>(device, config, render),
            cpal::SampleFormat::U8 => build_typed_stream::<u8>(device, config, render),
            _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
        }
    }

    /// Render into an f32 scratch block, then convert to the device's sample type.
    fn build_typed_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut render: RenderFn,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = config.channels as usize;
        let mut scratch = vec![0.0f32; CALLBACK_CHUNK_FRAMES * channels];

        device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(scratch.len()) {
                    let mixed = &mut scratch[..chunk.len()];
                    render(mixed, chunk.len() / channels);
                    for (out, &sample) in chunk.iter_mut().zip(mixed.iter()) {
                        *out = T::from_sample(sample);
                    }
                }
            },
            |err| error!("cpal stream error: {}", err),
            None,
        )
    }
}
