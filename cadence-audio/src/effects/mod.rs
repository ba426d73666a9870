//! Output-path effects: 5-band equalizer and Schroeder reverb

mod equalizer;
mod reverb;
mod stage;

pub use equalizer::{Equalizer, EQ_BANDS, EQ_FREQUENCIES, EQ_MAX_GAIN_DB};
pub use reverb::Reverb;
pub use stage::{soft_clip, EqualizerReverbStage, SOFT_CLIP_KNEE};

/// Trait for audio effects
pub trait Effect: Send {
    /// Prepare filter state for a stream format
    fn configure(&mut self, sample_rate: u32, channels: u16);

    /// Process audio samples in place (interleaved, -1.0 - 1.0)
    fn process(&mut self, samples: &mut [f32]);

    /// Reset effect state
    fn reset(&mut self);

    /// Check if effect is enabled
    fn is_enabled(&self) -> bool;

    /// Enable/disable the effect
    fn set_enabled(&mut self, enabled: bool);

    /// Get effect name
    fn name(&self) -> &'static str;
}
