#![cfg(feature = "wav")]

use std::io::Cursor;

use hound::{SampleFormat as WavFormat, WavSpec, WavWriter};
use mischer::{pan_gains, AudioEngine, AudioError, OutputFormat, Sound, Wave};

fn engine() -> AudioEngine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    AudioEngine::offline(OutputFormat::stereo_f32(48_000))
}

/// 16-bit mono WAV file in memory.
fn wav_file(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: WavFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[test]
fn wav_sound_is_converted_to_device_format() {
    let engine = engine();
    let wave = Wave::from_memory("wav", &wav_file(48_000, &[16384; 100])).unwrap();
    let sound = Sound::from_wave(&engine, &wave).unwrap();

    assert!(sound.is_ready());
    assert_eq!(sound.frame_count(), 100);
    assert_eq!(sound.channels(), 2);
    assert_eq!(sound.sample_rate(), 48_000);
    assert_eq!(sound.sample_size(), 32);

    sound.play();
    let mut out = [0.0f32; 8];
    engine.on_output_request(&mut out, 4);

    let [g0, g1] = pan_gains(0.5, 1.0);
    assert!(out.chunks_exact(2).all(|f| f[0] == 0.5 * g0 && f[1] == 0.5 * g1));
}

#[test]
fn resampled_sound_changes_length() {
    let engine = engine();
    let wave = Wave::from_memory("wav", &wav_file(24_000, &[1000; 240])).unwrap();
    let sound = Sound::from_wave(&engine, &wave).unwrap();

    assert_eq!(sound.frame_count(), 480);

    sound.play();
    let mut out = vec![0.0f32; 2 * 480];
    engine.on_output_request(&mut out, 480);
    // Constant input stays constant through to the final frame
    assert!(out[0] > 0.0);
    assert_eq!(&out[2 * 479..], &out[..2]);
    assert!(!sound.is_playing());
}

#[test]
fn load_reads_files_from_disk() {
    let engine = engine();
    let path = std::env::temp_dir().join(format!("mischer-load-{}.wav", std::process::id()));
    std::fs::write(&path, wav_file(48_000, &[0; 32])).unwrap();

    let sound = Sound::load(&engine, &path);
    std::fs::remove_file(&path).unwrap();

    assert_eq!(sound.unwrap().frame_count(), 32);
    assert!(matches!(
        Sound::load(&engine, "missing-file.wav"),
        Err(AudioError::Io(_))
    ));
}

#[test]
fn alias_shares_pcm_but_not_playback_state() {
    let engine = engine();
    let sound = Sound::from_wave(&engine, &Wave::from_f32(1, 48_000, &[0.5; 64])).unwrap();
    sound.set_volume(0.4);

    let alias = sound.alias().unwrap();
    assert!(sound.shares_storage_with(&alias));
    assert_ne!(sound.id(), alias.id());
    assert_eq!(alias.playback_state().unwrap().volume, 0.4);

    alias.set_pan(0.0);
    alias.play();
    assert!(alias.is_playing());
    assert!(!sound.is_playing());
    assert_eq!(sound.playback_state().unwrap().pan, 0.5);
}

#[test]
fn destroying_an_alias_keeps_the_original_playing() {
    let engine = engine();
    let sound = Sound::from_wave(&engine, &Wave::from_f32(1, 48_000, &[0.5; 64])).unwrap();
    sound.set_looping(true);
    sound.play();

    let alias = sound.alias().unwrap();
    let alias_id = alias.id();
    alias.play();
    alias.destroy();

    assert!(!engine.contains(alias_id));
    assert_eq!(engine.registered(), vec![sound.id()]);

    let mut out = [0.0f32; 16];
    engine.on_output_request(&mut out, 8);
    let [g0, _] = pan_gains(0.5, 1.0);
    assert!(out.chunks_exact(2).all(|f| f[0] == 0.5 * g0));
    assert!(sound.is_ready());
}

#[test]
fn dropping_a_sound_frees_its_buffer() {
    let engine = engine();
    let id = {
        let sound = Sound::from_wave(&engine, &Wave::from_f32(1, 48_000, &[0.5; 8])).unwrap();
        sound.id()
    };
    assert!(!engine.contains(id));
    assert!(engine.registered().is_empty());
}

#[test]
fn unready_inputs_are_rejected() {
    let engine = engine();
    assert!(matches!(
        Sound::from_wave(&engine, &Wave::default()),
        Err(AudioError::WaveNotReady)
    ));

    engine.shutdown();
    assert!(matches!(
        Sound::from_wave(&engine, &Wave::from_f32(1, 48_000, &[0.5; 8])),
        Err(AudioError::NotInitialized)
    ));
}
