//! Real-time primitives shared by the ear key detector.
//!
//! # Primary API
//!
//! - [`SampleRing`]: single-producer/single-consumer sample queue between the
//!   audio callback and the analysis thread. Overflow drops the oldest unread
//!   samples instead of blocking the producer.
//! - [`ChannelMix`]: how multi-channel callback buffers fold down to mono.
//! - [`AtomicFloat`], [`AtomicFlag`], [`AtomicDouble`]: cache-line aligned
//!   atomics for parameters shared with a UI thread.
//!
//! # Example
//!
//! ```
//! use ear_core::{ChannelMix, SampleRing};
//!
//! let ring = SampleRing::new(8);
//! let left = [0.5f32; 4];
//! let right = [0.25f32; 4];
//! ring.push(&[&left[..], &right[..]], 4, ChannelMix::default());
//!
//! let mut out = [0.0f32; 4];
//! assert_eq!(ring.pop(&mut out), 4);
//! assert_eq!(out, [0.375; 4]);
//! ```

pub mod error;
pub use error::{Error, Result};

mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat};

mod mix;
pub use mix::ChannelMix;

mod ring;
pub use ring::SampleRing;

pub use std::sync::atomic::Ordering;
pub use std::sync::Arc;
