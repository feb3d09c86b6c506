use mischer::{
    AudioEngine, AudioError, AudioStream, BufferUsage, OutputFormat, RingFeed, SampleFormat,
    DEFAULT_STREAM_BUFFER_FRAMES,
};

fn mono_engine() -> AudioEngine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    AudioEngine::offline(OutputFormat::new(SampleFormat::F32, 1, 48_000))
}

fn render(engine: &AudioEngine, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; frames];
    engine.on_output_request(&mut out, frames);
    out
}

#[test]
fn halves_play_in_order_and_underrun_is_silent() {
    let engine = mono_engine();
    let stream = AudioStream::new(&engine, SampleFormat::S16, 1, 48_000, 4).unwrap();
    assert!(stream.is_processed());

    assert_eq!(stream.update(&[16384i16; 4]).unwrap(), 4);
    assert_eq!(stream.update(&[8192i16; 4]).unwrap(), 4);
    assert!(!stream.is_processed());
    assert_eq!(stream.update(&[0i16; 4]).unwrap(), 0);

    stream.play();
    assert_eq!(
        render(&engine, 8),
        vec![0.5, 0.5, 0.5, 0.5, 0.25, 0.25, 0.25, 0.25]
    );
    assert!(stream.is_processed());

    // Nothing refilled: silence, but the stream keeps going
    assert_eq!(render(&engine, 4), vec![0.0; 4]);
    assert!(stream.is_playing());

    stream.update(&[-16384i16; 4]).unwrap();
    assert_eq!(render(&engine, 4), vec![-0.5; 4]);

    let state = stream.playback_state().unwrap();
    assert_eq!(state.usage, BufferUsage::Streaming);
    assert!(state.is_looping);
}

#[test]
fn refill_while_playing() {
    let engine = mono_engine();
    let stream = AudioStream::new(&engine, SampleFormat::F32, 1, 48_000, 4).unwrap();
    stream.update(&[0.1f32; 4]).unwrap();
    stream.update(&[0.2f32; 4]).unwrap();
    stream.play();

    assert_eq!(render(&engine, 4), vec![0.1; 4]);
    assert!(stream.is_processed());
    stream.update(&[0.3f32; 4]).unwrap();

    assert_eq!(render(&engine, 8), vec![0.2, 0.2, 0.2, 0.2, 0.3, 0.3, 0.3, 0.3]);
}

#[test]
fn short_update_is_padded_with_silence() {
    let engine = mono_engine();
    let stream = AudioStream::new(&engine, SampleFormat::F32, 1, 48_000, 4).unwrap();
    assert_eq!(stream.update(&[0.5f32; 2]).unwrap(), 2);
    assert_eq!(stream.update(&[0.5f32; 9]).unwrap(), 4);
    stream.play();

    assert_eq!(render(&engine, 8), vec![0.5, 0.5, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5]);
}

#[test]
fn zero_frames_selects_the_default_size() {
    let engine = mono_engine();
    let stream = AudioStream::new(&engine, SampleFormat::S16, 2, 44_100, 0).unwrap();
    assert_eq!(stream.sub_buffer_frames(), DEFAULT_STREAM_BUFFER_FRAMES);
    assert_eq!(
        stream.playback_state().unwrap().frame_count,
        DEFAULT_STREAM_BUFFER_FRAMES * 2
    );
}

#[test]
fn mismatched_sample_type_is_rejected() {
    let engine = mono_engine();
    let stream = AudioStream::new(&engine, SampleFormat::S16, 1, 48_000, 4).unwrap();
    assert!(matches!(
        stream.update(&[0.0f32; 4]),
        Err(AudioError::InvalidBuffer(_))
    ));
}

#[test]
fn ring_feed_streams_from_another_thread() {
    let engine = mono_engine();
    let (mut producer, feed) = RingFeed::new(256, 1);
    let stream = AudioStream::from_callback(&engine, 1, 48_000, feed).unwrap();

    std::thread::spawn(move || {
        for _ in 0..64 {
            producer.push(0.25).unwrap();
        }
    })
    .join()
    .unwrap();

    stream.play();
    let out = render(&engine, 96);
    assert!(out[..64].iter().all(|&s| s == 0.25));
    assert!(out[64..].iter().all(|&s| s == 0.0));
    assert!(stream.is_playing());

    assert!(matches!(
        stream.update(&[0.0f32; 4]),
        Err(AudioError::WrongBufferKind { .. })
    ));
}
