//! # Ear - Real-time Key Detection
//!
//! Listens to a live audio stream and reports its musical key.
//!
//! ## Architecture
//!
//! Ear is an umbrella crate that coordinates:
//! - **ear-core** - Lock-free sample ring, channel down-mix, shared atomics, errors
//! - **ear-analysis** - Framing, chroma key estimation, vote stabilization, recorder thread
//!
//! ## Quick Start
//!
//! ```
//! use ear::prelude::*;
//!
//! let recorder = EarBuilder::new().build()?;
//! let updates = recorder.subscribe();
//!
//! // Audio device callbacks
//! recorder.audio_device_about_to_start(44100.0)?;
//! recorder.start()?;
//! let block = [0.0f32; 256];
//! recorder.push_audio(&[&block[..], &block[..]], 256);
//!
//! // UI side: re-read the estimate whenever `updates` fires
//! if updates.try_recv().is_ok() {
//!     println!("key: {}", recorder.current_estimate().label());
//! }
//!
//! recorder.stop()?;
//! # Ok::<(), ear::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `serialization` - serde support for configs, keys and estimates

mod builder;
mod error;

pub use builder::EarBuilder;
pub use error::{Error, Result};

/// Re-export of ear-core for direct access
pub use ear_core as core;

/// Re-export of ear-analysis for direct access
pub use ear_analysis as analysis;

pub use ear_core::{ChannelMix, SampleRing};

pub use ear_analysis::{
    chroma_factory, AudioFrame, ChromaKeyEstimator, EstimatorFactory, FrameSource, Key,
    KeyEstimate, KeyMode, KeyRecorder, KeyVoteStabilizer, PitchClass, RecorderConfig,
    SpectralDescriptors, SpectralKeyEstimator, VoteConfig, VotePool,
};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{EarBuilder, Error, Result};

    pub use ear_analysis::{
        Key, KeyEstimate, KeyMode, KeyRecorder, PitchClass, RecorderConfig,
        SpectralDescriptors, SpectralKeyEstimator, VoteConfig,
    };
    pub use ear_core::ChannelMix;
}
