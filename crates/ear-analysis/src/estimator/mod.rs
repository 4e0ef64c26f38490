//! Spectral key estimation stage.
//!
//! The recorder treats the estimator as a black box: it hands over one frame
//! at a time and, every few frames, forces a best-effort answer.

mod chroma;

pub use chroma::{ChromaKeyEstimator, ChromaSettings, MAJOR_PROFILE, MINOR_PROFILE};

use crate::config::RecorderConfig;
use crate::frame::AudioFrame;
use crate::key::Key;
use std::sync::Arc;

/// Key guess and signal descriptors from one forced finalize.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SpectralDescriptors {
    /// Best matching key, `None` when there was too little pitched content.
    pub key: Option<Key>,
    /// Confidence of `key` in 0..=1. Always 0 when `key` is `None`.
    pub strength: f32,
    /// RMS loudness of the analysed frames.
    pub rms: f32,
    /// Spectral flatness in dB (0 for white noise, very negative for tones).
    pub flatness_db: f32,
    /// Spectral centroid in Hz.
    pub centroid: f32,
}

impl SpectralDescriptors {
    /// Key label, or an empty string when no key was found.
    pub fn key_label(&self) -> String {
        self.key.map(|k| k.label()).unwrap_or_default()
    }

    /// A key was found with non-zero confidence.
    pub fn has_key(&self) -> bool {
        self.key.is_some() && self.strength > 0.0
    }
}

/// Incremental key estimator fed by the analysis thread.
pub trait SpectralKeyEstimator: Send {
    /// Fold one frame into the running state. Silent frames should be
    /// counted but otherwise skipped.
    fn accumulate(&mut self, frame: &AudioFrame<'_>);

    /// Produce the best guess from everything accumulated since the last
    /// finalize, then clear the running state for the next window.
    ///
    /// Finding no key is a normal outcome: return `key: None` and
    /// `strength: 0`.
    fn force_finalize(&mut self) -> SpectralDescriptors;

    /// Drop all accumulated state (new recording session).
    fn reset(&mut self);
}

/// Builds an estimator for a session at the given sample rate.
pub type EstimatorFactory =
    Arc<dyn Fn(f64, &RecorderConfig) -> Box<dyn SpectralKeyEstimator> + Send + Sync>;

/// Factory for the bundled [`ChromaKeyEstimator`].
pub fn chroma_factory() -> EstimatorFactory {
    Arc::new(
        |sample_rate: f64, config: &RecorderConfig| -> Box<dyn SpectralKeyEstimator> {
            Box::new(ChromaKeyEstimator::new(sample_rate, config.frame_size))
        },
    )
}
