//! Stream a generated sine through a ring buffer
//!
//! Run with: cargo run --example stream_sine --features cpal_output
//!
//! Lists output devices and lets you pick one. A producer thread synthesizes
//! a 440Hz sine into a `RingFeed`; the mixer pulls from it in the device
//! callback.

use std::io::{self, Write};
use std::thread::sleep;
use std::time::Duration;

use mischer::{AudioEngine, AudioStream, CpalBackend, EngineConfig, RingFeed};

const CHANNELS: usize = 2;

fn main() {
    tracing_subscriber::fmt::init();

    let devices = CpalBackend::list_outputs();
    if devices.is_empty() {
        eprintln!("No audio output devices found!");
        return;
    }

    println!("Available audio output devices:");
    for (i, name) in devices.iter().enumerate() {
        println!("  [{}] {}", i, name);
    }

    print!("\nSelect device [default]: ");
    let _ = io::stdout().flush();
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    let backend = match input.trim().parse::<usize>().ok().and_then(|i| devices.get(i)) {
        Some(name) => CpalBackend::named(name.clone()),
        None => CpalBackend::new(),
    };

    let engine = AudioEngine::with_backend(EngineConfig::default(), &backend);
    let Some(format) = engine.output_format() else {
        eprintln!("Audio device failed to start");
        return;
    };
    println!("\nUsing {:?}", format);

    let sample_rate = format.sample_rate;
    let (mut producer, feed) = RingFeed::new(sample_rate as usize / 10, CHANNELS);
    let stream = match AudioStream::from_callback(&engine, CHANNELS, sample_rate, feed) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Failed to create stream: {}", e);
            return;
        }
    };
    stream.set_volume(0.25);
    stream.play();

    println!("Playing 440Hz sine wave for 5 seconds...");

    let step = 440.0 * std::f32::consts::TAU / sample_rate as f32;
    let mut phase = 0.0f32;
    let total_frames = sample_rate as usize * 5;
    let mut written = 0;

    while written < total_frames {
        while producer.slots() >= CHANNELS && written < total_frames {
            let s = phase.sin();
            for _ in 0..CHANNELS {
                let _ = producer.push(s);
            }
            phase = (phase + step) % std::f32::consts::TAU;
            written += 1;
        }
        sleep(Duration::from_millis(5));
    }

    // Let the ring drain
    sleep(Duration::from_millis(150));
    println!("Done!");
}
