//! Signal generators and polling helpers for ear integration tests.

#![allow(dead_code)]

use ear::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 44100.0;

/// Audio callback block size used when feeding a recorder.
pub const TEST_BLOCK_SIZE: usize = 512;

/// Upper bound for any wait on the analysis thread.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Small, quick-reacting recorder for tests.
pub fn test_recorder() -> KeyRecorder {
    EarBuilder::new()
        .compute_frame_count(4)
        .sample_rate(TEST_SAMPLE_RATE)
        .build()
        .expect("Failed to create test recorder")
}

/// Sine wave at `frequency` for `num_samples` samples.
pub fn generate_sine(frequency: f64, sample_rate: f64, num_samples: usize) -> Vec<f32> {
    generate_chord(&[(frequency, 1.0)], sample_rate, num_samples)
}

/// Sum of sines given as `(frequency, amplitude)` pairs.
pub fn generate_chord(partials: &[(f64, f32)], sample_rate: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate;
            partials
                .iter()
                .map(|&(f, a)| a * (2.0 * std::f64::consts::PI * f * t).sin() as f32)
                .sum()
        })
        .collect()
}

/// C major scale notes held together, tonic triad emphasised.
pub fn c_major(num_samples: usize) -> Vec<f32> {
    generate_chord(
        &[
            (523.25, 0.17),
            (659.26, 0.14),
            (783.99, 0.14),
            (1174.66, 0.1),
            (1396.91, 0.1),
            (1760.0, 0.1),
            (1975.53, 0.1),
        ],
        TEST_SAMPLE_RATE,
        num_samples,
    )
}

/// A harmonic minor notes held together, tonic triad emphasised.
pub fn a_minor(num_samples: usize) -> Vec<f32> {
    generate_chord(
        &[
            (440.0, 0.17),
            (523.25, 0.14),
            (659.26, 0.14),
            (987.77, 0.1),
            (1174.66, 0.1),
            (1396.91, 0.1),
            (1661.22, 0.1),
        ],
        TEST_SAMPLE_RATE,
        num_samples,
    )
}

/// Generate silence (zero samples).
pub fn generate_silence(num_samples: usize) -> Vec<f32> {
    vec![0.0; num_samples]
}

/// Reproducible white noise in -amplitude..amplitude.
pub fn generate_noise(num_samples: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = seed;
    (0..num_samples)
        .map(|_| {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
            (((rng >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0) * amplitude
        })
        .collect()
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Push `signal` as dual-mono callback blocks.
pub fn push_stereo(recorder: &KeyRecorder, signal: &[f32]) {
    for block in signal.chunks(TEST_BLOCK_SIZE) {
        recorder.push_audio(&[block, block], block.len());
    }
}

/// Push `signal` block by block, napping between blocks so the analysis
/// thread keeps up, until `done` holds for the current estimate.
pub fn feed_until(
    recorder: &KeyRecorder,
    signal: &[f32],
    done: impl Fn(&KeyEstimate) -> bool,
) -> Option<Arc<KeyEstimate>> {
    let deadline = Instant::now() + TEST_TIMEOUT;
    loop {
        for block in signal.chunks(TEST_BLOCK_SIZE * 4) {
            recorder.push_audio(&[block, block], block.len());
            std::thread::sleep(Duration::from_millis(2));

            let estimate = recorder.current_estimate();
            if done(&estimate) {
                return Some(estimate);
            }
            if Instant::now() > deadline {
                return None;
            }
        }
    }
}

/// Poll until at least `rounds` rounds have been published.
pub fn wait_for_rounds(recorder: &KeyRecorder, rounds: u64) -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while recorder.rounds() < rounds {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}
