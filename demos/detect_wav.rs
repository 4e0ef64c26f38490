//! # Detect WAV
//!
//! Stream a WAV file through a key recorder as if it came from an audio
//! device, printing every key change. Without an argument a synthetic
//! C major chord is used.
//!
//! **Concepts:** device callbacks, change notification, estimate snapshots
//!
//! ```bash
//! RUST_LOG=ear_analysis=debug cargo run --example detect_wav -- song.wav
//! ```

use ear::prelude::*;
use std::time::Duration;

/// Callback block size.
const BLOCK: usize = 512;

/// Playback speed relative to real time.
const SPEED: f64 = 8.0;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (sample_rate, channels) = match std::env::args().nth(1) {
        Some(path) => read_wav(&path)?,
        None => (44100.0, vec![synth_chord(44100.0, 10.0)]),
    };

    let recorder = EarBuilder::new().compute_frame_count(8).build()?;
    let updates = recorder.subscribe();

    recorder.audio_device_about_to_start(sample_rate)?;
    recorder.start()?;

    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let block_time = Duration::from_secs_f64(BLOCK as f64 / sample_rate / SPEED);
    let mut last: Option<Key> = None;

    for start in (0..frames).step_by(BLOCK) {
        let end = (start + BLOCK).min(frames);
        let block: Vec<&[f32]> = channels.iter().map(|c| &c[start..end]).collect();
        recorder.push_audio(&block, end - start);
        std::thread::sleep(block_time);

        if updates.try_recv().is_ok() {
            let estimate = recorder.current_estimate();
            if estimate.key != last {
                last = estimate.key;
                println!(
                    "{:7.2}s  {:<4} confidence {:.2}  level {:.3}",
                    start as f64 / sample_rate,
                    estimate.label(),
                    estimate.confidence,
                    recorder.input_level(),
                );
            }
        }
    }

    recorder.stop()?;
    println!(
        "{} rounds, {} samples dropped",
        recorder.rounds(),
        recorder.dropped_samples()
    );
    Ok(())
}

fn read_wav(path: &str) -> std::result::Result<(f64, Vec<Vec<f32>>), hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample)
                .ok_or(hound::Error::FormatError("unsupported bits per sample"))?;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let n = spec.channels.max(1) as usize;
    let mut channels = vec![Vec::with_capacity(interleaved.len() / n); n];
    for frame in interleaved.chunks_exact(n) {
        for (ch, &s) in channels.iter_mut().zip(frame) {
            ch.push(s);
        }
    }
    Ok((spec.sample_rate as f64, channels))
}

/// Factor mapping integer samples of `bits` width to [-1, 1).
fn int_scale(bits: u16) -> Option<f32> {
    match bits {
        1..=32 => Some(1.0 / (1u64 << (bits - 1)) as f32),
        _ => None,
    }
}

fn synth_chord(sample_rate: f64, seconds: f64) -> Vec<f32> {
    let notes = [(523.25, 0.2), (659.26, 0.15), (783.99, 0.15), (1046.5, 0.1)];
    (0..(sample_rate * seconds) as usize)
        .map(|i| {
            let t = i as f64 / sample_rate;
            notes
                .iter()
                .map(|&(f, a)| a * (2.0 * std::f64::consts::PI * f * t).sin())
                .sum::<f64>() as f32
        })
        .collect()
}
