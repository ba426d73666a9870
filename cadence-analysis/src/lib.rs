//! Audio analysis for Cadence
//!
//! Real-time spectral pulse analysis and beat/tempo detection used by the
//! playback engine's visualization tap and smart crossfade timing.

mod beat;
mod pulse;

pub use beat::{BeatDetector, BeatSettings};
pub use pulse::{
    PulseConfig, PulseSnapshot, SpectralPulseAnalyzer, FFT_SIZE, PULSE_BANDS, SPECTRUM_BINS,
    WAVEFORM_POINTS,
};
