//! # Ear Analysis
//!
//! Real-time musical key detection for a live audio stream.
//!
//! This crate provides:
//! - **Framing**: overlapping analysis frames cut from a [`SampleRing`](ear_core::SampleRing),
//!   with an optional high-pass pre-filter
//! - **Key estimation**: the [`SpectralKeyEstimator`] contract and a bundled
//!   pitch-class-profile implementation, [`ChromaKeyEstimator`]
//! - **Vote stabilization**: a decaying [`VotePool`] that keeps a consistent
//!   key from flickering on momentary misdetections
//! - **Live recording**: [`KeyRecorder`], which owns the analysis thread and
//!   publishes a [`KeyEstimate`] after every stabilization round
//!
//! ## Example
//!
//! ```rust
//! use ear_analysis::{KeyRecorder, RecorderConfig};
//!
//! let recorder = KeyRecorder::with_chroma(RecorderConfig::default()).unwrap();
//! let updates = recorder.subscribe();
//!
//! recorder.audio_device_about_to_start(44100.0).unwrap();
//! recorder.start().unwrap();
//!
//! // From the audio callback:
//! let left = vec![0.0f32; 512];
//! let right = vec![0.0f32; 512];
//! recorder.push_audio(&[&left[..], &right[..]], 512);
//!
//! // From the UI, after `updates` fires:
//! let _label = recorder.current_estimate().label();
//!
//! recorder.stop().unwrap();
//! # drop(updates);
//! ```

pub mod config;
pub mod estimator;
pub mod filter;
pub mod frame;
pub mod key;
pub mod votes;

mod live;
mod recorder;

pub use config::{RecorderConfig, VoteConfig};
pub use estimator::{
    chroma_factory, ChromaKeyEstimator, ChromaSettings, EstimatorFactory, SpectralDescriptors,
    SpectralKeyEstimator,
};
pub use filter::HighPass;
pub use frame::{AudioFrame, FrameSource};
pub use key::{Key, KeyMode, PitchClass};
pub use live::KeyEstimate;
pub use recorder::KeyRecorder;
pub use votes::{KeyVoteStabilizer, VotePool};
