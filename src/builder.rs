//! Builder for configuring and constructing a [`KeyRecorder`].

use crate::Result;
use ear_analysis::{chroma_factory, EstimatorFactory, KeyRecorder, RecorderConfig, VoteConfig};
use ear_core::ChannelMix;
use std::time::Duration;

/// Fluent front end over [`RecorderConfig`].
///
/// Without [`estimator`](Self::estimator) the bundled chroma estimator is
/// used. A [`sample_rate`](Self::sample_rate) is only needed to start
/// recording before the audio device reports one.
///
/// # Example
///
/// ```
/// use ear::prelude::*;
///
/// let recorder = EarBuilder::new()
///     .compute_frame_count(8)
///     .sensitivity(3.0)
///     .sample_rate(48000.0)
///     .build()?;
///
/// recorder.start()?;
/// assert!(recorder.is_recording());
/// recorder.stop()?;
/// # Ok::<(), ear::Error>(())
/// ```
#[derive(Default)]
pub struct EarBuilder {
    config: RecorderConfig,
    estimator: Option<EstimatorFactory>,
    sample_rate: Option<f64>,
}

impl EarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 4096
    pub fn frame_size(mut self, samples: usize) -> Self {
        self.config.frame_size = samples;
        self
    }

    /// Default: 2048
    pub fn hop_size(mut self, samples: usize) -> Self {
        self.config.hop_size = samples;
        self
    }

    /// Default: 44100
    pub fn ring_capacity(mut self, samples: usize) -> Self {
        self.config.ring_capacity = samples;
        self
    }

    /// Default: 15
    pub fn compute_frame_count(mut self, frames: usize) -> Self {
        self.config.compute_frame_count = frames;
        self
    }

    /// Default: 5.0
    pub fn sensitivity(mut self, gain: f32) -> Self {
        self.config.sensitivity = gain;
        self
    }

    /// Default: `Some(300.0)`. `None` disables the pre-filter.
    pub fn high_pass(mut self, cutoff: Option<f32>) -> Self {
        self.config.high_pass_cutoff = cutoff;
        self
    }

    pub fn channel_mix(mut self, mix: ChannelMix) -> Self {
        self.config.channel_mix = mix;
        self
    }

    pub fn silence_threshold(mut self, peak: f32) -> Self {
        self.config.silence_threshold = peak;
        self
    }

    pub fn votes(mut self, votes: VoteConfig) -> Self {
        self.config.votes = votes;
        self
    }

    /// Default: 1 s
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    /// Use a custom key estimator instead of the bundled chroma one.
    pub fn estimator(mut self, factory: EstimatorFactory) -> Self {
        self.estimator = Some(factory);
        self
    }

    /// Sample rate to assume until the audio device reports its own.
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn build(self) -> Result<KeyRecorder> {
        let factory = self.estimator.unwrap_or_else(chroma_factory);
        let recorder = KeyRecorder::new(self.config, factory)?;
        if let Some(sample_rate) = self.sample_rate {
            recorder.audio_device_about_to_start(sample_rate)?;
        }
        Ok(recorder)
    }
}
