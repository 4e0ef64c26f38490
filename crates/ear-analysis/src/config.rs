//! Recorder configuration.

use ear_core::{ChannelMix, Error, Result};
use std::time::Duration;

/// Constants of the decaying vote memory.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct VoteConfig {
    /// Multiplier applied to every weight each round (0 < f <= 1).
    pub decay_factor: f32,
    /// Amount subtracted from every weight each round after scaling.
    pub decay_constant: f32,
    /// Upper clamp for any single weight.
    pub cap_weight: f32,
    /// Rounds whose loudness (RMS) is below this cast no vote.
    pub loudness_gate: f32,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.9,
            decay_constant: 1.0,
            cap_weight: 40.0,
            loudness_gate: 0.005,
        }
    }
}

impl VoteConfig {
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<()> {
        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "decay_factor {} out of range (0, 1]",
                self.decay_factor
            )));
        }
        if !(self.decay_constant >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "decay_constant {} must be non-negative",
                self.decay_constant
            )));
        }
        if !(self.cap_weight > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "cap_weight {} must be positive",
                self.cap_weight
            )));
        }
        if !(self.loudness_gate >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "loudness_gate {} must be non-negative",
                self.loudness_gate
            )));
        }
        Ok(())
    }
}

/// Configuration for a [`KeyRecorder`](crate::KeyRecorder).
///
/// `compute_frame_count` and `sensitivity` are only initial values; both can
/// be changed while recording.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct RecorderConfig {
    /// Samples per analysis frame.
    pub frame_size: usize,
    /// Stride between consecutive frame starts.
    pub hop_size: usize,
    /// Ring capacity in mono samples.
    pub ring_capacity: usize,
    /// Frames accumulated between forced key estimates. 0 disables estimates.
    pub compute_frame_count: usize,
    /// Vote gain: larger values let fresh evidence override inertia faster.
    pub sensitivity: f32,
    /// How device channels are folded to mono.
    pub channel_mix: ChannelMix,
    /// High-pass pre-filter cutoff in Hz, `None` to disable.
    pub high_pass_cutoff: Option<f32>,
    /// Frames whose peak absolute sample is below this are silent.
    pub silence_threshold: f32,
    pub votes: VoteConfig,
    /// Nap between polls of an empty ring.
    pub idle_sleep: Duration,
    /// Longest `stop()` waits for the analysis thread.
    pub stop_timeout: Duration,
    /// Smoothing coefficient of the callback-side input level meter.
    pub input_level_alpha: f32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_size: 4096,
            hop_size: 2048,
            ring_capacity: 44100,
            compute_frame_count: 15,
            sensitivity: 5.0,
            channel_mix: ChannelMix::StereoAverage,
            high_pass_cutoff: Some(300.0),
            silence_threshold: 1e-3,
            votes: VoteConfig::default(),
            idle_sleep: Duration::from_millis(1),
            stop_timeout: Duration::from_millis(1000),
            input_level_alpha: 0.1,
        }
    }
}

impl RecorderConfig {
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(Error::InvalidConfig("frame_size must be positive".into()));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(Error::InvalidConfig(format!(
                "hop_size {} out of range (1-{})",
                self.hop_size, self.frame_size
            )));
        }
        if self.ring_capacity < self.frame_size {
            return Err(Error::InvalidConfig(format!(
                "ring_capacity {} smaller than frame_size {}",
                self.ring_capacity, self.frame_size
            )));
        }
        if !(self.sensitivity >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "sensitivity {} must be non-negative",
                self.sensitivity
            )));
        }
        if let Some(cutoff) = self.high_pass_cutoff {
            if !(cutoff > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "high_pass_cutoff {} must be positive",
                    cutoff
                )));
            }
        }
        if !(0.0..1.0).contains(&self.input_level_alpha) {
            return Err(Error::InvalidConfig(format!(
                "input_level_alpha {} out of range [0, 1)",
                self.input_level_alpha
            )));
        }
        self.votes.validate()
    }
}
