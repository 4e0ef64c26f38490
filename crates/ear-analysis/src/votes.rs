//! Temporal smoothing of per-window key guesses.
//!
//! Every finalize round first decays all weights, then adds a vote for the
//! fresh guess, then resolves the heaviest key. A strong, consistent key
//! builds up to the cap; a momentary misdetection has to out-vote it.

use crate::config::VoteConfig;
use crate::estimator::SpectralDescriptors;
use crate::key::{Key, KeyMode, PitchClass};

/// Decaying vote weights for all 24 keys.
///
/// Indexed by [`PitchClass::index`]. Weights stay in `[0, cap_weight]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VotePool {
    major: [f32; 12],
    minor: [f32; 12],
}

impl VotePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(&self, key: Key) -> f32 {
        self.mode(key.mode)[key.tonic.index()]
    }

    /// Zero one mode, or both with `None`.
    pub fn clear(&mut self, mode: Option<KeyMode>) {
        match mode {
            Some(m) => self.mode_mut(m).fill(0.0),
            None => {
                self.major.fill(0.0);
                self.minor.fill(0.0);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.major.iter().chain(&self.minor).all(|&w| w == 0.0)
    }

    /// Heaviest key and its weight, `None` while every weight is zero.
    ///
    /// Within a mode the first pitch class in A..G# order wins ties; across
    /// modes minor must be strictly heavier than major.
    pub fn resolve(&self) -> Option<(Key, f32)> {
        let major = heaviest(&self.major);
        let minor = heaviest(&self.minor);
        match (major, minor) {
            (Some((_, wm)), Some((tn, wn))) if wn > wm => Some((Key::minor(tn), wn)),
            (Some((tm, wm)), _) => Some((Key::major(tm), wm)),
            (None, Some((tn, wn))) => Some((Key::minor(tn), wn)),
            (None, None) => None,
        }
    }

    fn mode(&self, mode: KeyMode) -> &[f32; 12] {
        match mode {
            KeyMode::Major => &self.major,
            KeyMode::Minor => &self.minor,
        }
    }

    fn mode_mut(&mut self, mode: KeyMode) -> &mut [f32; 12] {
        match mode {
            KeyMode::Major => &mut self.major,
            KeyMode::Minor => &mut self.minor,
        }
    }
}

fn heaviest(weights: &[f32; 12]) -> Option<(PitchClass, f32)> {
    let mut best: Option<(PitchClass, f32)> = None;
    for (pc, &w) in PitchClass::ALL.iter().zip(weights) {
        if w > best.map_or(0.0, |(_, b)| b) {
            best = Some((*pc, w));
        }
    }
    best
}

/// Applies decay, vote, and resolution to a [`VotePool`].
#[derive(Debug, Clone)]
pub struct KeyVoteStabilizer {
    config: VoteConfig,
}

impl KeyVoteStabilizer {
    pub fn new(config: VoteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VoteConfig {
        &self.config
    }

    /// Multiply every weight by the decay factor, subtract the decay
    /// constant, and clamp to `[0, cap_weight]`.
    pub fn decay(&self, pool: &mut VotePool) {
        let c = &self.config;
        for w in pool.major.iter_mut().chain(pool.minor.iter_mut()) {
            *w = (*w * c.decay_factor - c.decay_constant).clamp(0.0, c.cap_weight);
        }
    }

    /// Add `sensitivity * strength` to the descriptor's key.
    ///
    /// Returns `false` without touching the pool when there is no key, the
    /// strength is zero, or the window was quieter than the loudness gate.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn vote(
        &self,
        pool: &mut VotePool,
        descriptors: &SpectralDescriptors,
        sensitivity: f32,
    ) -> bool {
        let Some(key) = descriptors.key else {
            return false;
        };
        if !(descriptors.strength > 0.0) || descriptors.rms < self.config.loudness_gate {
            return false;
        }
        let gain = sensitivity.max(0.0) * descriptors.strength;
        let slot = &mut pool.mode_mut(key.mode)[key.tonic.index()];
        *slot = (*slot + gain).min(self.config.cap_weight);
        true
    }

    /// One full round: decay, vote, resolve.
    pub fn update(
        &self,
        pool: &mut VotePool,
        descriptors: &SpectralDescriptors,
        sensitivity: f32,
    ) -> Option<Key> {
        self.decay(pool);
        self.vote(pool, descriptors, sensitivity);
        pool.resolve().map(|(key, _)| key)
    }

    /// Share of the cap held by the winning key.
    pub fn confidence(&self, weight: f32) -> f32 {
        (weight / self.config.cap_weight).clamp(0.0, 1.0)
    }
}
