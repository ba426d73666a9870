//! Second-order IIR section (direct form I)
//!
//! Coefficient derivations follow the RBJ Audio EQ Cookbook. Everything is
//! normalized by `a0` so the difference equation is
//! `y = b0·x + b1·x1 + b2·x2 - a1·y1 - a2·y2`.

use std::f64::consts::PI;

/// Normalized biquad coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    /// Pass-through
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Peaking (bell) EQ
    pub fn peaking(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha / a;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// High shelf via the prewarped bilinear transform
    ///
    /// `gain_db` is applied above `freq`; the band-edge gain is shaped by `q`.
    pub fn high_shelf(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let k = (PI * freq / sample_rate).tan();
        let vh = 10f64.powf(gain_db / 20.0);
        let vb = vh.powf(0.499_666_774_154_541_6);

        let a0 = 1.0 + k / q + k * k;
        Self {
            b0: (vh + vb * k / q + k * k) / a0,
            b1: 2.0 * (k * k - vh) / a0,
            b2: (vh - vb * k / q + k * k) / a0,
            a1: 2.0 * (k * k - 1.0) / a0,
            a2: (1.0 - k / q + k * k) / a0,
        }
    }

    /// Second-order high-pass via the prewarped bilinear transform
    pub fn high_pass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let k = (PI * freq / sample_rate).tan();
        let a0 = 1.0 + k / q + k * k;
        Self {
            b0: 1.0,
            b1: -2.0,
            b2: 1.0,
            a1: 2.0 * (k * k - 1.0) / a0,
            a2: (1.0 - k / q + k * k) / a0,
        }
    }

    /// Magnitude response at `freq` (linear gain)
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let (cos1, sin1) = (omega.cos(), omega.sin());
        let (cos2, sin2) = ((2.0 * omega).cos(), (2.0 * omega).sin());

        let num_re = self.b0 + self.b1 * cos1 + self.b2 * cos2;
        let num_im = -(self.b1 * sin1 + self.b2 * sin2);
        let den_re = 1.0 + self.a1 * cos1 + self.a2 * cos2;
        let den_im = -(self.a1 * sin1 + self.a2 * sin2);

        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// One biquad section with its own history
#[derive(Debug, Clone, Copy, Default)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            ..Default::default()
        }
    }

    /// Swap coefficients, keeping history
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let c = &self.coeffs;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    /// Clear history
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// True when all history values are zero
    pub fn is_cleared(&self) -> bool {
        self.x1 == 0.0 && self.x2 == 0.0 && self.y1 == 0.0 && self.y2 == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_gain_peaking_is_flat() {
        for &q in &[0.3, 1.0, 4.0] {
            for &center in &[60.0, 910.0, 14000.0] {
                let coeffs = BiquadCoeffs::peaking(center, q, 0.0, 48000.0);
                for &freq in &[20.0, 100.0, 1000.0, 5000.0, 20000.0] {
                    let mag = coeffs.magnitude_at(freq, 48000.0);
                    assert!((mag - 1.0).abs() < 1e-9, "q={} f0={} f={} mag={}", q, center, freq, mag);
                }
            }
        }
    }

    #[test]
    fn test_peaking_gain_at_center() {
        let coeffs = BiquadCoeffs::peaking(1000.0, 1.0, 6.0, 44100.0);
        let db = 20.0 * coeffs.magnitude_at(1000.0, 44100.0).log10();
        assert!((db - 6.0).abs() < 0.01, "got {} dB", db);
    }

    #[test]
    fn test_high_pass_blocks_dc() {
        let mut filter = Biquad::new(BiquadCoeffs::high_pass(100.0, 0.707, 44100.0));
        let mut out = 0.0;
        for _ in 0..44100 {
            out = filter.process(1.0);
        }
        assert!(out.abs() < 1e-6);
    }

    #[test]
    fn test_high_shelf_boosts_top() {
        let coeffs = BiquadCoeffs::high_shelf(1500.0, 0.707, 4.0, 48000.0);
        let low = 20.0 * coeffs.magnitude_at(50.0, 48000.0).log10();
        let high = 20.0 * coeffs.magnitude_at(15000.0, 48000.0).log10();
        assert!(low.abs() < 0.1);
        assert!((high - 4.0).abs() < 0.2);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut filter = Biquad::new(BiquadCoeffs::peaking(230.0, 1.0, 9.0, 44100.0));
        filter.process(0.5);
        filter.process(-0.25);
        assert!(!filter.is_cleared());
        filter.reset();
        assert!(filter.is_cleared());
    }
}
