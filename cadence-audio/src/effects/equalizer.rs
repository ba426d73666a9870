//! 5-band peaking equalizer

use super::Effect;
use crate::filters::{Biquad, BiquadCoeffs};

/// Number of EQ bands
pub const EQ_BANDS: usize = 5;

/// Band center frequencies in Hz
pub const EQ_FREQUENCIES: [f64; EQ_BANDS] = [60.0, 230.0, 910.0, 3600.0, 14000.0];

/// Maximum boost/cut per band in dB
pub const EQ_MAX_GAIN_DB: f32 = 12.0;

const EQ_Q: f64 = 1.0;

/// Graphic equalizer with one peaking biquad per band and channel
pub struct Equalizer {
    sample_rate: u32,
    channels: usize,
    gains: [f32; EQ_BANDS],
    filters: [[Biquad; EQ_BANDS]; 2],
    enabled: bool,
}

impl Equalizer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let mut eq = Self {
            sample_rate,
            channels: channels.clamp(1, 2) as usize,
            gains: [0.0; EQ_BANDS],
            filters: [[Biquad::default(); EQ_BANDS]; 2],
            enabled: false,
        };
        eq.update_all();
        eq
    }

    /// Set gain of one band in dB (±12dB)
    ///
    /// Out-of-range band indices are ignored.
    pub fn set_band_gain(&mut self, band: usize, gain_db: f32) {
        if band >= EQ_BANDS || !gain_db.is_finite() {
            return;
        }
        self.gains[band] = gain_db.clamp(-EQ_MAX_GAIN_DB, EQ_MAX_GAIN_DB);
        self.update_band(band);
    }

    /// Get gain of one band in dB (0 for invalid bands)
    pub fn band_gain(&self, band: usize) -> f32 {
        self.gains.get(band).copied().unwrap_or(0.0)
    }

    pub fn gains(&self) -> [f32; EQ_BANDS] {
        self.gains
    }

    /// True when every band is at 0dB
    pub fn is_flat(&self) -> bool {
        self.gains.iter().all(|&g| g == 0.0)
    }

    fn update_band(&mut self, band: usize) {
        let coeffs = BiquadCoeffs::peaking(
            EQ_FREQUENCIES[band],
            EQ_Q,
            self.gains[band] as f64,
            self.sample_rate as f64,
        );
        for channel in self.filters.iter_mut() {
            channel[band].set_coeffs(coeffs);
        }
    }

    fn update_all(&mut self) {
        for band in 0..EQ_BANDS {
            self.update_band(band);
        }
    }

    /// True when no filter carries history
    pub fn is_cleared(&self) -> bool {
        self.filters.iter().flatten().all(Biquad::is_cleared)
    }
}

impl Effect for Equalizer {
    fn configure(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate;
        self.channels = channels.clamp(1, 2) as usize;
        self.update_all();
        self.reset();
    }

    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }

        for frame in samples.chunks_exact_mut(self.channels) {
            for (sample, filters) in frame.iter_mut().zip(self.filters.iter_mut()) {
                let mut value = *sample as f64;
                for filter in filters.iter_mut() {
                    value = filter.process(value);
                }
                *sample = value as f32;
            }
        }
    }

    fn reset(&mut self) {
        for filter in self.filters.iter_mut().flatten() {
            filter.reset();
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn name(&self) -> &'static str {
        "Equalizer"
    }
}
