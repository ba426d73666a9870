//! Stateful IIR and delay-line building blocks
//!
//! Plain value types holding coefficients and history. Higher-level stages
//! group them into fixed-size arrays indexed by band and channel.

mod allpass;
mod biquad;
mod comb;

pub use allpass::AllpassFilter;
pub use biquad::{Biquad, BiquadCoeffs};
pub use comb::CombFilter;

/// Convert a delay in milliseconds to whole samples (at least one)
pub fn delay_samples(ms: f32, sample_rate: u32) -> usize {
    ((ms * sample_rate as f32 / 1000.0).round() as usize).max(1)
}
