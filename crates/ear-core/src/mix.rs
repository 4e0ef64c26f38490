//! Channel down-mix policies for callback buffers.

/// How a multi-channel callback block is folded to mono before it enters
/// the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ChannelMix {
    /// Average of the first two channels when at least two are present,
    /// otherwise channel 0 unchanged.
    #[default]
    StereoAverage,
    /// Always channel 0.
    FirstChannel,
}

impl ChannelMix {
    /// Mono sample at `frame`. `channels` must be non-empty and every used
    /// channel must be longer than `frame`.
    #[inline]
    pub fn sample(self, channels: &[&[f32]], frame: usize) -> f32 {
        match (self, channels) {
            (ChannelMix::StereoAverage, [left, right, ..]) => (left[frame] + right[frame]) * 0.5,
            (_, [first, ..]) => first[frame],
            (_, []) => 0.0,
        }
    }

    /// Number of frames that can be read from `channels` without going past
    /// the end of any channel this policy touches.
    #[inline]
    pub fn readable_frames(self, channels: &[&[f32]], frames: usize) -> usize {
        let used = match self {
            ChannelMix::StereoAverage => channels.len().min(2),
            ChannelMix::FirstChannel => channels.len().min(1),
        };
        channels[..used]
            .iter()
            .fold(frames, |n, channel| n.min(channel.len()))
            * usize::from(used > 0)
    }
}
