//! Play a WAV or Ogg Vorbis file, twice over, through aliases
//!
//! Run with: cargo run --example play_sound --features cpal_output -- <file>

use std::thread::sleep;
use std::time::Duration;

use mischer::{AudioEngine, Sound};

fn main() {
    tracing_subscriber::fmt::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: play_sound <file.wav|file.ogg>");
        return;
    };

    let engine = AudioEngine::default_output();
    if !engine.is_ready() {
        eprintln!("Audio device failed to start");
        return;
    }

    let sound = match Sound::load(&engine, &path) {
        Ok(sound) => sound,
        Err(e) => {
            eprintln!("Failed to load {}: {}", path, e);
            return;
        }
    };

    let seconds = sound.frame_count() as f64 / sound.sample_rate() as f64;
    println!("Loaded {} ({:.2}s, {} channels)", path, seconds, sound.channels());

    println!("Playing centered...");
    sound.play();
    while sound.is_playing() {
        sleep(Duration::from_millis(20));
    }

    // Hard left and hard right, a quarter second apart
    let echo = match sound.alias() {
        Ok(echo) => echo,
        Err(e) => {
            eprintln!("Failed to alias sound: {}", e);
            return;
        }
    };
    sound.set_pan(1.0);
    echo.set_pan(0.0);
    echo.set_volume(0.5);

    println!("Playing with a panned echo...");
    sound.play();
    sleep(Duration::from_millis(250));
    echo.play();
    while sound.is_playing() || echo.is_playing() {
        sleep(Duration::from_millis(20));
    }

    engine.shutdown();
    println!("Done!");
}
