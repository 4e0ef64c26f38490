//! Fixed-size overlapping analysis frames cut from the sample ring.

use crate::filter::HighPass;
use ear_core::SampleRing;

/// Samples drained from the ring per `fill_from` call.
const DRAIN_CHUNK: usize = 1024;

/// One analysis window of mono samples.
///
/// Borrowed from the [`FrameSource`] that produced it and valid until the
/// next call to [`FrameSource::next_frame`].
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    samples: &'a [f32],
    index: u64,
    silent: bool,
}

impl<'a> AudioFrame<'a> {
    /// Build a frame directly, classifying silence with `silence_threshold`.
    pub fn new(samples: &'a [f32], index: u64, silence_threshold: f32) -> Self {
        Self {
            samples,
            index,
            silent: peak(samples) < silence_threshold,
        }
    }

    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sequence number since the source was created or reset.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Peak absolute sample was below the silence threshold. Estimators skip
    /// heavy work for silent frames.
    pub fn is_silent(&self) -> bool {
        self.silent
    }
}

#[inline]
fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

/// Turns popped ring samples into frames of `frame_size` samples, advancing
/// `hop_size` samples between frames.
///
/// Returns nothing until a full frame is buffered; the caller retries after
/// more audio arrives.
pub struct FrameSource {
    frame_size: usize,
    hop_size: usize,
    silence_threshold: f32,
    buffer: Vec<f32>,
    scratch: Vec<f32>,
    high_pass: Option<HighPass>,
    /// The previous frame is still borrowed; drop its hop on the next call.
    pending_hop: bool,
    frames_emitted: u64,
}

impl FrameSource {
    /// `hop_size` is clamped to `1..=frame_size`.
    pub fn new(frame_size: usize, hop_size: usize, silence_threshold: f32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            hop_size: hop_size.clamp(1, frame_size),
            silence_threshold,
            buffer: Vec::with_capacity(frame_size + DRAIN_CHUNK),
            scratch: vec![0.0; DRAIN_CHUNK],
            high_pass: None,
            pending_hop: false,
            frames_emitted: 0,
        }
    }

    /// Filter every incoming sample through `filter` before framing.
    pub fn with_high_pass(mut self, filter: HighPass) -> Self {
        self.high_pass = Some(filter);
        self
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Samples buffered toward the next frame.
    pub fn buffered(&self) -> usize {
        let hop = if self.pending_hop { self.hop_size } else { 0 };
        self.buffer.len().saturating_sub(hop)
    }

    /// Drain one chunk of available samples from `ring`. Returns how many
    /// samples were taken (0 when the ring is empty).
    pub fn fill_from(&mut self, ring: &SampleRing) -> usize {
        let n = ring.pop(&mut self.scratch);
        if n > 0 {
            let mut chunk = std::mem::take(&mut self.scratch);
            self.push_samples(&mut chunk[..n]);
            self.scratch = chunk;
        }
        n
    }

    /// Append samples that did not come through a ring.
    pub fn extend(&mut self, samples: &[f32]) {
        for chunk in samples.chunks(DRAIN_CHUNK) {
            let n = chunk.len();
            self.scratch[..n].copy_from_slice(chunk);
            let mut scratch = std::mem::take(&mut self.scratch);
            self.push_samples(&mut scratch[..n]);
            self.scratch = scratch;
        }
    }

    fn push_samples(&mut self, samples: &mut [f32]) {
        if let Some(filter) = self.high_pass.as_mut() {
            filter.process_in_place(samples);
        }
        self.buffer.extend_from_slice(samples);
    }

    /// Next frame if `frame_size` samples are buffered.
    pub fn next_frame(&mut self) -> Option<AudioFrame<'_>> {
        if self.pending_hop {
            self.buffer.drain(..self.hop_size);
            self.pending_hop = false;
        }
        if self.buffer.len() < self.frame_size {
            return None;
        }

        self.pending_hop = true;
        let index = self.frames_emitted;
        self.frames_emitted += 1;
        Some(AudioFrame::new(
            &self.buffer[..self.frame_size],
            index,
            self.silence_threshold,
        ))
    }

    /// Forget buffered samples and filter state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_hop = false;
        self.frames_emitted = 0;
        if let Some(filter) = self.high_pass.as_mut() {
            filter.reset();
        }
    }
}
