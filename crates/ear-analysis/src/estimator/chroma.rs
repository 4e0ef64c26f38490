//! Pitch-class profile key estimator.
//!
//! Each voiced frame is windowed, transformed, and reduced to spectral peaks.
//! Peaks are folded into a 12-bin harmonic pitch class profile which is
//! summed across the window and finally correlated against rotated
//! Krumhansl-Kessler major and minor templates.

use super::{SpectralDescriptors, SpectralKeyEstimator};
use crate::frame::AudioFrame;
use crate::key::{Key, KeyMode, PitchClass};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Krumhansl-Kessler major profile, tonic first.
pub const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor profile, tonic first.
pub const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const EPSILON: f32 = 1e-12;

/// Tunables of the [`ChromaKeyEstimator`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ChromaSettings {
    /// Lowest peak frequency folded into the profile (Hz).
    pub min_frequency: f32,
    /// Highest peak frequency folded into the profile (Hz).
    pub max_frequency: f32,
    /// Peaks with smaller magnitude are ignored.
    pub peak_floor: f32,
    /// Half width of the cos² weighting window, in semitones.
    pub half_width: f32,
    /// Tuning reference for pitch class A (Hz).
    pub reference: f32,
}

impl Default for ChromaSettings {
    fn default() -> Self {
        Self {
            min_frequency: 40.0,
            max_frequency: 6000.0,
            peak_floor: 1e-8,
            half_width: 1.0,
            reference: 440.0,
        }
    }
}

/// Running accumulation between two finalizes.
#[derive(Debug, Default)]
struct Window {
    pcp: [f32; 12],
    voiced: u32,
    frames: u32,
    rms: f32,
    flatness_db: f32,
    centroid: f32,
}

/// Bundled [`SpectralKeyEstimator`] based on harmonic pitch class profiles.
pub struct ChromaKeyEstimator {
    sample_rate: f64,
    fft_size: usize,
    settings: ChromaSettings,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    acc: Window,
}

impl ChromaKeyEstimator {
    pub fn new(sample_rate: f64, fft_size: usize) -> Self {
        Self::with_settings(sample_rate, fft_size, ChromaSettings::default())
    }

    pub fn with_settings(sample_rate: f64, fft_size: usize, settings: ChromaSettings) -> Self {
        let fft_size = fft_size.max(4);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            sample_rate,
            fft_size,
            settings,
            fft,
            window: blackman_harris(fft_size),
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            magnitudes: vec![0.0; fft_size / 2 + 1],
            acc: Window::default(),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn settings(&self) -> &ChromaSettings {
        &self.settings
    }

    /// Frames folded in since the last finalize, silent ones included.
    pub fn frames_accumulated(&self) -> u32 {
        self.acc.frames
    }

    /// Profile summed over the voiced frames seen so far, index 0 = A.
    pub fn pitch_class_profile(&self) -> &[f32; 12] {
        &self.acc.pcp
    }

    /// Window the frame (zero padded or truncated to the FFT size) and fill
    /// `magnitudes`.
    fn analyse(&mut self, samples: &[f32]) {
        for (i, bin) in self.spectrum.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(0.0);
            *bin = Complex::new(s * self.window[i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
        for (mag, bin) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *mag = bin.norm();
        }
    }

    fn bin_hz(&self) -> f32 {
        (self.sample_rate / self.fft_size as f64) as f32
    }

    /// Fold the interpolated spectral peaks into a 12-bin profile.
    fn frame_profile(&self) -> [f32; 12] {
        let mut pcp = [0.0f32; 12];
        let bin_hz = self.bin_hz();
        let s = &self.settings;

        for k in 1..self.magnitudes.len().saturating_sub(1) {
            let (a, b, c) = (
                self.magnitudes[k - 1],
                self.magnitudes[k],
                self.magnitudes[k + 1],
            );
            if !(b > a && b >= c && b > s.peak_floor) {
                continue;
            }

            let denom = a - 2.0 * b + c;
            let delta = if denom.abs() > EPSILON {
                (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            let freq = (k as f32 + delta) * bin_hz;
            if freq < s.min_frequency || freq > s.max_frequency {
                continue;
            }
            let mag = b - 0.25 * (a - c) * delta;

            let semitones = 12.0 * (freq / s.reference).log2();
            for (pc, slot) in pcp.iter_mut().enumerate() {
                let mut diff = (semitones - pc as f32).rem_euclid(12.0);
                if diff > 6.0 {
                    diff -= 12.0;
                }
                if diff.abs() < s.half_width {
                    let w = (core::f32::consts::FRAC_PI_2 * diff / s.half_width).cos();
                    *slot += w * w * mag * mag;
                }
            }
        }
        pcp
    }

    /// Spectral flatness (dB) and centroid (Hz) of the current magnitudes.
    fn shape(&self) -> (f32, f32) {
        let bins = &self.magnitudes[1..];
        if bins.is_empty() {
            return (0.0, 0.0);
        }
        let bin_hz = self.bin_hz();

        let mut log_sum = 0.0f64;
        let mut power_sum = 0.0f64;
        let mut weighted = 0.0f64;
        let mut mag_sum = 0.0f64;
        for (i, &m) in bins.iter().enumerate() {
            let p = (m * m) as f64 + EPSILON as f64;
            log_sum += p.ln();
            power_sum += p;
            weighted += (i + 1) as f64 * bin_hz as f64 * m as f64;
            mag_sum += m as f64;
        }
        let n = bins.len() as f64;
        let geo = (log_sum / n).exp();
        let mean = power_sum / n;
        let flatness_db = 10.0 * (geo / mean).log10();
        let centroid = if mag_sum > 0.0 { weighted / mag_sum } else { 0.0 };
        (flatness_db as f32, centroid as f32)
    }
}

impl SpectralKeyEstimator for ChromaKeyEstimator {
    fn accumulate(&mut self, frame: &AudioFrame<'_>) {
        self.acc.frames += 1;
        if frame.is_silent() || frame.is_empty() {
            return;
        }

        let samples = frame.samples();
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();

        self.analyse(samples);
        let (flatness_db, centroid) = self.shape();
        let profile = self.frame_profile();

        self.acc.voiced += 1;
        self.acc.rms += rms;
        self.acc.flatness_db += flatness_db;
        self.acc.centroid += centroid;

        let max = profile.iter().fold(0.0f32, |m, &v| m.max(v));
        if max > 0.0 {
            for (acc, v) in self.acc.pcp.iter_mut().zip(profile) {
                *acc += v / max;
            }
        }
    }

    fn force_finalize(&mut self) -> SpectralDescriptors {
        let acc = core::mem::take(&mut self.acc);
        if acc.voiced == 0 {
            return SpectralDescriptors::default();
        }

        let n = acc.voiced as f32;
        let mut out = SpectralDescriptors {
            rms: acc.rms / n,
            flatness_db: acc.flatness_db / n,
            centroid: acc.centroid / n,
            ..Default::default()
        };
        if let Some((key, score)) = best_key(&acc.pcp) {
            out.key = Some(key);
            out.strength = score.clamp(0.0, 1.0);
            if out.strength == 0.0 {
                out.key = None;
            }
        }
        out
    }

    fn reset(&mut self) {
        self.acc = Window::default();
    }
}

/// Best matching key for a profile (index 0 = A), with its correlation.
///
/// Ties keep the first candidate in A..G# order, major before minor.
/// Returns `None` for an all-zero or degenerate profile.
pub(crate) fn best_key(pcp: &[f32; 12]) -> Option<(Key, f32)> {
    if pcp.iter().all(|&v| v <= 0.0) {
        return None;
    }

    let mut best: Option<(Key, f32)> = None;
    for (mode, profile) in [
        (KeyMode::Major, &MAJOR_PROFILE),
        (KeyMode::Minor, &MINOR_PROFILE),
    ] {
        for tonic in 0..12 {
            let mut rotated = [0.0f32; 12];
            for (i, slot) in rotated.iter_mut().enumerate() {
                *slot = pcp[(tonic + i) % 12];
            }
            let r = pearson(&rotated, profile);
            if r.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, b)| r > b) {
                best = Some((Key::new(PitchClass::from_index(tonic), mode), r));
            }
        }
    }
    best
}

fn pearson(x: &[f32; 12], y: &[f32; 12]) -> f32 {
    let mx = x.iter().sum::<f32>() / 12.0;
    let my = y.iter().sum::<f32>() / 12.0;
    let (mut sxy, mut sxx, mut syy) = (0.0f32, 0.0f32, 0.0f32);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom > EPSILON {
        sxy / denom
    } else {
        f32::NAN
    }
}

/// 3-term Blackman-Harris (62 dB) window.
fn blackman_harris(size: usize) -> Vec<f32> {
    const A0: f32 = 0.44959;
    const A1: f32 = 0.49364;
    const A2: f32 = 0.05677;
    let n = (size - 1).max(1) as f32;
    (0..size)
        .map(|i| {
            let t = 2.0 * core::f32::consts::PI * i as f32 / n;
            A0 - A1 * t.cos() + A2 * (2.0 * t).cos()
        })
        .collect()
}
