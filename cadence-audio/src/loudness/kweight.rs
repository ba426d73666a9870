//! BS.1770 K-weighting pre-filter

use crate::filters::{Biquad, BiquadCoeffs};

/// Stage 1: high shelf modelling the acoustic effect of the head
const SHELF_FREQ: f64 = 1681.974_450_955_533;
const SHELF_Q: f64 = 0.707_175_236_955_419_6;
const SHELF_GAIN_DB: f64 = 3.999_843_853_973_347;

/// Stage 2: RLB high-pass
const HIGH_PASS_FREQ: f64 = 38.135_470_876_024_44;
const HIGH_PASS_Q: f64 = 0.500_327_037_323_877_3;

/// Two-stage K-weighting filter for one channel
#[derive(Debug, Clone, Copy)]
pub struct KWeighting {
    shelf: Biquad,
    high_pass: Biquad,
}

impl KWeighting {
    pub fn new(sample_rate: u32) -> Self {
        let fs = sample_rate as f64;
        Self {
            shelf: Biquad::new(BiquadCoeffs::high_shelf(SHELF_FREQ, SHELF_Q, SHELF_GAIN_DB, fs)),
            high_pass: Biquad::new(BiquadCoeffs::high_pass(HIGH_PASS_FREQ, HIGH_PASS_Q, fs)),
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f64) -> f64 {
        self.high_pass.process(self.shelf.process(sample))
    }

    /// Combined magnitude response in dB at `freq`
    pub fn response_db(&self, freq: f64, sample_rate: u32) -> f64 {
        let fs = sample_rate as f64;
        let magnitude = self.shelf.coeffs().magnitude_at(freq, fs) * self.high_pass.coeffs().magnitude_at(freq, fs);
        20.0 * magnitude.log10()
    }

    pub fn reset(&mut self) {
        self.shelf.reset();
        self.high_pass.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_response() {
        let filter = KWeighting::new(48000);
        // Unity offset at 1kHz is what the -0.691 constant compensates
        assert!((filter.response_db(1000.0, 48000) - 0.691).abs() < 0.05);
        assert!((filter.response_db(10000.0, 48000) - 4.0).abs() < 0.3);
        assert!(filter.response_db(20.0, 48000) < -10.0);
    }
}
