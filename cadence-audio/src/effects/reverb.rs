//! Schroeder reverb
//!
//! Four parallel feedback combs, summed and averaged, followed by two series
//! allpass filters for diffusion. The reverb input is the mono downmix of the
//! dry frame; each channel has its own filter bank, the right one detuned by
//! a small stereo spread.

use super::Effect;
use crate::filters::{delay_samples, AllpassFilter, CombFilter};

/// Comb delays in ms, mutually near-incommensurate
const COMB_DELAYS_MS: [f32; 4] = [29.7, 37.1, 41.1, 43.7];

/// Allpass delays in ms
const ALLPASS_DELAYS_MS: [f32; 2] = [5.0, 1.7];

const ALLPASS_COEFFICIENT: f32 = 0.5;

/// Stereo spread in samples at 44.1kHz
const STEREO_SPREAD: usize = 23;

/// Upper bound for comb feedback
pub const MAX_DECAY: f32 = 0.98;

struct ChannelReverb {
    combs: [CombFilter; 4],
    allpasses: [AllpassFilter; 2],
}

impl ChannelReverb {
    fn new(sample_rate: u32, spread: usize, feedback: f32) -> Self {
        Self {
            combs: std::array::from_fn(|i| {
                CombFilter::new(delay_samples(COMB_DELAYS_MS[i], sample_rate) + spread, feedback)
            }),
            allpasses: std::array::from_fn(|i| {
                AllpassFilter::new(
                    delay_samples(ALLPASS_DELAYS_MS[i], sample_rate) + spread,
                    ALLPASS_COEFFICIENT,
                )
            }),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut wet = self.combs.iter_mut().map(|c| c.process(input)).sum::<f32>() / 4.0;
        for allpass in self.allpasses.iter_mut() {
            wet = allpass.process(wet);
        }
        wet
    }

    fn set_feedback(&mut self, feedback: f32) {
        for comb in self.combs.iter_mut() {
            comb.set_feedback(feedback);
        }
    }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::reset);
        self.allpasses.iter_mut().for_each(AllpassFilter::reset);
    }
}

/// Stereo Schroeder reverb
pub struct Reverb {
    channels: usize,
    banks: [ChannelReverb; 2],
    mix: f32,   // 0.0 - 1.0
    decay: f32, // 0.0 - 0.98, comb feedback
    enabled: bool,
}

impl Reverb {
    /// Create a new reverb for a stream format
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let decay = 0.7;
        Self {
            channels: channels.clamp(1, 2) as usize,
            banks: Self::build_banks(sample_rate, decay),
            mix: 0.3,
            decay,
            enabled: false,
        }
    }

    fn build_banks(sample_rate: u32, decay: f32) -> [ChannelReverb; 2] {
        let spread = (STEREO_SPREAD as f32 * sample_rate as f32 / 44100.0) as usize;
        [
            ChannelReverb::new(sample_rate, 0, decay),
            ChannelReverb::new(sample_rate, spread, decay),
        ]
    }

    /// Set wet/dry mix (0.0 - 1.0)
    pub fn set_mix(&mut self, mix: f32) {
        if mix.is_finite() {
            self.mix = mix.clamp(0.0, 1.0);
        }
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    /// Set decay as comb feedback (0.0 - 0.98)
    pub fn set_decay(&mut self, decay: f32) {
        if !decay.is_finite() {
            return;
        }
        self.decay = decay.clamp(0.0, MAX_DECAY);
        for bank in self.banks.iter_mut() {
            bank.set_feedback(self.decay);
        }
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }
}

impl Effect for Reverb {
    fn configure(&mut self, sample_rate: u32, channels: u16) {
        self.channels = channels.clamp(1, 2) as usize;
        self.banks = Self::build_banks(sample_rate, self.decay);
    }

    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }

        let dry_gain = 1.0 - self.mix;
        let channels = self.channels;
        for frame in samples.chunks_exact_mut(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            for (sample, bank) in frame.iter_mut().zip(self.banks.iter_mut()) {
                let wet = bank.process(mono);
                *sample = wet * self.mix + *sample * dry_gain;
            }
        }
    }

    fn reset(&mut self) {
        self.banks.iter_mut().for_each(ChannelReverb::reset);
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn name(&self) -> &'static str {
        "Reverb"
    }
}
