//! High-pass pre-filter applied to the mono stream before framing.
//!
//! Second-order Butterworth section (RBJ cookbook coefficients), transposed
//! direct form II. Removes rumble and hum below the lowest pitches the key
//! estimator cares about.

use std::f32::consts::{FRAC_1_SQRT_2, PI};

#[derive(Debug, Clone)]
pub struct HighPass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl HighPass {
    /// `cutoff` is clamped to 1 Hz and just below Nyquist, whichever is lower
    /// winning for sample rates under about 2 Hz.
    pub fn new(cutoff: f32, sample_rate: f64) -> Self {
        let sr = sample_rate as f32;
        let ceiling = sr * 0.49;
        let cutoff = cutoff.min(ceiling).max(ceiling.min(1.0));
        let w0 = 2.0 * PI * cutoff / sr;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * FRAC_1_SQRT_2);

        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos) * 0.5 / a0,
            b1: -(1.0 + cos) / a0,
            b2: (1.0 + cos) * 0.5 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn tick(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    pub fn process_in_place(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.tick(*s);
        }
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}
