//! Lock-free scalars shared between the audio, analysis and UI threads.
//!
//! Loads use `Acquire` and stores use `Release` so a value written by one
//! thread is visible together with everything that thread wrote before it.

use atomic_float::{AtomicF32, AtomicF64};
use std::sync::atomic::{AtomicBool, Ordering};

macro_rules! aligned_atomic {
    ($(#[$meta:meta])* $name:ident, $inner:ty, $scalar:ty, $zero:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        #[repr(align(64))]
        pub struct $name {
            value: $inner,
        }

        impl $name {
            pub fn new(value: $scalar) -> Self {
                Self {
                    value: <$inner>::new(value),
                }
            }

            #[inline]
            pub fn get(&self) -> $scalar {
                self.value.load(Ordering::Acquire)
            }

            #[inline]
            pub fn set(&self, value: $scalar) {
                self.value.store(value, Ordering::Release);
            }

            /// Store `value` and return the previous one.
            #[inline]
            pub fn replace(&self, value: $scalar) -> $scalar {
                self.value.swap(value, Ordering::AcqRel)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($zero)
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                Self::new(self.get())
            }
        }
    };
}

aligned_atomic!(
    /// Atomic `f32` for gains, levels and other UI-tunable parameters.
    AtomicFloat,
    AtomicF32,
    f32,
    0.0
);

aligned_atomic!(
    /// Atomic `f64`, used for the device sample rate.
    AtomicDouble,
    AtomicF64,
    f64,
    0.0
);

aligned_atomic!(
    /// Atomic `bool` for run/stop signalling.
    AtomicFlag,
    AtomicBool,
    bool,
    false
);

impl AtomicFloat {
    /// One-pole smoothing toward `target`: `v = alpha * v + (1 - alpha) * target`.
    ///
    /// Single-writer only; concurrent writers may lose updates.
    #[inline]
    pub fn smooth_toward(&self, target: f32, alpha: f32) -> f32 {
        let next = alpha * self.value.load(Ordering::Relaxed) + (1.0 - alpha) * target;
        self.set(next);
        next
    }
}

impl AtomicFlag {
    /// Set the flag if it is clear. Returns `true` if this call set it.
    #[inline]
    pub fn try_raise(&self) -> bool {
        self.value
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}
