//! Equalizer + reverb stage operating on 16-bit PCM in place

use super::{Effect, Equalizer, Reverb};
use crate::pcm::{f32_to_i16, i16_to_f32};

/// Level above which the soft clipper starts bending the signal
pub const SOFT_CLIP_KNEE: f32 = 0.9;

/// Exponential-knee soft clipper
///
/// Identity up to the knee, then an exponential approach towards ±1 whose
/// value and slope match the linear segment at the knee. Never reaches ±1.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= SOFT_CLIP_KNEE {
        return x;
    }
    let headroom = 1.0 - SOFT_CLIP_KNEE;
    let bent = SOFT_CLIP_KNEE + headroom * (1.0 - (-(magnitude - SOFT_CLIP_KNEE) / headroom).exp());
    bent.copysign(x)
}

/// EQ → reverb → soft clip, skipped entirely while both effects are off
pub struct EqualizerReverbStage {
    equalizer: Equalizer,
    reverb: Reverb,
    scratch: Vec<f32>,
}

impl EqualizerReverbStage {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            equalizer: Equalizer::new(sample_rate, channels),
            reverb: Reverb::new(sample_rate, channels),
            scratch: Vec::new(),
        }
    }

    /// Rebuild filter state for a new stream format
    pub fn configure(&mut self, sample_rate: u32, channels: u16) {
        self.equalizer.configure(sample_rate, channels);
        self.reverb.configure(sample_rate, channels);
    }

    /// Process interleaved samples in place
    pub fn process(&mut self, samples: &mut [i16]) {
        if !self.is_active() {
            return;
        }

        self.scratch.clear();
        self.scratch.extend(samples.iter().map(|&s| i16_to_f32(s)));

        self.equalizer.process(&mut self.scratch);
        self.reverb.process(&mut self.scratch);

        for (out, &value) in samples.iter_mut().zip(self.scratch.iter()) {
            *out = f32_to_i16(soft_clip(value));
        }
    }

    /// Clear all filter history
    pub fn reset(&mut self) {
        self.equalizer.reset();
        self.reverb.reset();
    }

    /// True when at least one effect is enabled
    pub fn is_active(&self) -> bool {
        self.equalizer.is_enabled() || self.reverb.is_enabled()
    }

    /// Names of the enabled effects, in processing order
    pub fn active_effects(&self) -> Vec<&'static str> {
        let effects: [&dyn Effect; 2] = [&self.equalizer, &self.reverb];
        effects
            .iter()
            .filter(|effect| effect.is_enabled())
            .map(|effect| effect.name())
            .collect()
    }

    pub fn equalizer(&self) -> &Equalizer {
        &self.equalizer
    }

    pub fn equalizer_mut(&mut self) -> &mut Equalizer {
        &mut self.equalizer
    }

    pub fn reverb(&self) -> &Reverb {
        &self.reverb
    }

    pub fn reverb_mut(&mut self) -> &mut Reverb {
        &mut self.reverb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_clip_is_continuous_at_unity() {
        let below = soft_clip(1.0 - 1e-6);
        let above = soft_clip(1.0 + 1e-6);
        assert!((below - above).abs() < 1e-4);

        let knee_below = soft_clip(SOFT_CLIP_KNEE - 1e-6);
        let knee_above = soft_clip(SOFT_CLIP_KNEE + 1e-6);
        assert!((knee_below - knee_above).abs() < 1e-4);
    }

    #[test]
    fn test_soft_clip_is_bounded_and_monotonic() {
        let mut previous = soft_clip(-100.0);
        assert!(previous > -1.0);
        for i in -1000..=1000 {
            let x = i as f32 * 0.1;
            let y = soft_clip(x);
            assert!(y >= previous);
            assert!(y.abs() <= 1.0);
            previous = y;
        }
        assert!(soft_clip(1.5) < 1.0);
        assert!(soft_clip(1e6) <= 1.0);
    }

    #[test]
    fn test_soft_clip_is_identity_below_knee() {
        assert_eq!(soft_clip(0.5), 0.5);
        assert_eq!(soft_clip(-0.85), -0.85);
    }

    #[test]
    fn test_disabled_stage_is_noop() {
        let mut stage = EqualizerReverbStage::new(44100, 2);
        let input: Vec<i16> = (0..1024).map(|i| (i * 31 % 65536 - 32768) as i16).collect();
        let mut output = input.clone();
        stage.process(&mut output);
        assert_eq!(input, output);
    }

    #[test]
    fn test_active_effects_follow_enabled_flags() {
        let mut stage = EqualizerReverbStage::new(44100, 2);
        assert!(stage.active_effects().is_empty());
        stage.reverb_mut().set_enabled(true);
        assert_eq!(stage.active_effects(), vec!["Reverb"]);
        stage.equalizer_mut().set_enabled(true);
        assert_eq!(stage.active_effects(), vec!["Equalizer", "Reverb"]);
    }

    #[test]
    fn test_enabled_flat_eq_keeps_quiet_signal() {
        let mut stage = EqualizerReverbStage::new(44100, 2);
        stage.equalizer_mut().set_enabled(true);
        let input: Vec<i16> = (0..2048).map(|i| ((i as f32 * 0.03).sin() * 8000.0) as i16).collect();
        let mut output = input.clone();
        stage.process(&mut output);
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_boost_is_soft_clipped() {
        let mut stage = EqualizerReverbStage::new(44100, 1);
        stage.equalizer_mut().set_enabled(true);
        stage.equalizer_mut().set_band_gain(2, 12.0);
        let mut samples: Vec<i16> = (0..44100)
            .map(|i| ((2.0 * std::f32::consts::PI * 910.0 * i as f32 / 44100.0).sin() * 10000.0) as i16)
            .collect();
        stage.process(&mut samples);
        // Bounded below full scale even though the boost would overflow
        assert!(samples.iter().all(|&s| s > i16::MIN && s < i16::MAX));
        assert!(samples.iter().any(|&s| s > 29000));
    }
}
