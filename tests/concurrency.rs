use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use mischer::{AudioEngine, BufferDesc, BufferId, OutputFormat};

const WORKERS: usize = 4;
const BUFFERS_PER_WORKER: usize = 8;
const ROUNDS: usize = 500;

#[test]
fn register_unregister_races_with_the_mixer() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));

    let ids: Vec<Vec<BufferId>> = (0..WORKERS)
        .map(|_| {
            (0..BUFFERS_PER_WORKER)
                .map(|_| {
                    let id = engine
                        .create_buffer(BufferDesc::pcm_f32(2, 48_000, &[0.01; 256]))
                        .unwrap();
                    engine.set_looping(id, true);
                    engine.play(id);
                    id
                })
                .collect()
        })
        .collect();

    let running = Arc::new(AtomicBool::new(true));
    let mixer = {
        let engine = engine.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut out = vec![0.0f32; 2 * 300];
            let mut passes = 0usize;
            while running.load(Ordering::Relaxed) {
                engine.on_output_request(&mut out, 300);
                assert!(out.iter().all(|s| s.is_finite()));
                passes += 1;
            }
            passes
        })
    };

    let workers: Vec<_> = ids
        .iter()
        .cloned()
        .map(|mine| {
            let engine = engine.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    for &id in &mine {
                        if round % 2 == 0 {
                            engine.unregister(id);
                        } else {
                            engine.register(id);
                        }
                    }
                }
                // Net effect: even-indexed buffers end up unregistered
                for (i, &id) in mine.iter().enumerate() {
                    if i % 2 == 0 {
                        engine.unregister(id);
                    } else {
                        engine.register(id);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    running.store(false, Ordering::Relaxed);
    assert!(mixer.join().unwrap() > 0);

    let expected: HashSet<BufferId> = ids
        .iter()
        .flat_map(|mine| mine.iter().enumerate().filter(|(i, _)| i % 2 == 1).map(|(_, &id)| id))
        .collect();
    let registered: Vec<BufferId> = engine.registered();
    assert_eq!(registered.len(), expected.len());
    assert_eq!(registered.into_iter().collect::<HashSet<_>>(), expected);
}

#[test]
fn buffers_created_and_destroyed_while_mixing() {
    let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));
    let running = Arc::new(AtomicBool::new(true));

    let mixer = {
        let engine = engine.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut out = vec![0.0f32; 2 * 128];
            while running.load(Ordering::Relaxed) {
                engine.on_output_request(&mut out, 128);
            }
        })
    };

    let churn: Vec<_> = (0..WORKERS)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let id = engine
                        .create_buffer(BufferDesc::pcm_f32(1, 44_100, &[0.1; 64]))
                        .unwrap();
                    engine.play(id);
                    assert!(engine.destroy_buffer(id));
                    assert!(!engine.destroy_buffer(id));
                }
            })
        })
        .collect();

    for worker in churn {
        worker.join().unwrap();
    }
    running.store(false, Ordering::Relaxed);
    mixer.join().unwrap();

    assert!(engine.registered().is_empty());
}
