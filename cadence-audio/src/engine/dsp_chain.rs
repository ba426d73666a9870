//! Per-pipeline processing chain: EQ/reverb then pitch/tempo

use crate::config::EngineConfig;
use crate::effects::{Effect, EqualizerReverbStage, EQ_BANDS};
use crate::pcm::StreamFormat;
use crate::pitch::PitchShiftStage;
use tracing::debug;

pub struct DspChain {
    stage: EqualizerReverbStage,
    pitch: PitchShiftStage,
}

impl DspChain {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            stage: EqualizerReverbStage::new(format.sample_rate, format.channels),
            pitch: PitchShiftStage::new(format.sample_rate, format.channels),
        }
    }

    /// Bring effect parameters in line with `config`
    ///
    /// Pitch and speed are only touched when they change, since setting them
    /// restarts the resampler phase.
    pub fn apply(&mut self, config: &EngineConfig) {
        let eq = self.stage.equalizer_mut();
        eq.set_enabled(config.eq_enabled);
        for band in 0..EQ_BANDS {
            if eq.band_gain(band) != config.eq_gains[band] {
                eq.set_band_gain(band, config.eq_gains[band]);
            }
        }

        let reverb = self.stage.reverb_mut();
        reverb.set_enabled(config.reverb_enabled);
        reverb.set_mix(config.reverb_mix);
        if reverb.decay() != config.reverb_decay {
            reverb.set_decay(config.reverb_decay);
        }

        let semitones = if config.pitch_enabled {
            config.pitch_semitones
        } else {
            0.0
        };
        if (self.pitch.pitch_semitones() - semitones).abs() > 1e-4 {
            self.pitch.set_pitch_semitones(semitones);
        }
        if self.pitch.speed() != config.speed {
            self.pitch.set_speed(config.speed);
        }

        debug!(
            "DSP chain: effects {:?}, pitch {:+.2} st, speed {:.2}x",
            self.stage.active_effects(),
            self.pitch.pitch_semitones(),
            self.pitch.speed()
        );
    }

    /// Run one decoded block through the chain
    pub fn process(&mut self, mut samples: Vec<i16>) -> Vec<i16> {
        self.stage.process(&mut samples);
        if self.pitch.is_passthrough() && self.pitch.pending_frames() == 0 {
            return samples;
        }
        self.pitch.process(&samples)
    }

    /// Drain audio still buffered in the pitch stage at end of stream
    pub fn flush(&mut self) -> Vec<i16> {
        if self.pitch.pending_frames() == 0 {
            return Vec::new();
        }
        self.pitch.flush()
    }

    /// Clear filter history and replace the pitch session
    pub fn reset(&mut self) {
        self.stage.reset();
        self.pitch.reset();
    }

    pub fn is_active(&self) -> bool {
        self.stage.is_active() || !self.pitch.is_passthrough()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize) -> Vec<i16> {
        (0..frames)
            .flat_map(|i| {
                let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
                [v, v]
            })
            .collect()
    }

    #[test]
    fn test_default_chain_is_transparent() {
        let mut chain = DspChain::new(StreamFormat::new(44100, 2));
        chain.apply(&EngineConfig::default());
        assert!(!chain.is_active());
        let input = tone(1024);
        assert_eq!(chain.process(input.clone()), input);
        assert!(chain.flush().is_empty());
    }

    #[test]
    fn test_eq_enabled_changes_signal() {
        let mut chain = DspChain::new(StreamFormat::new(44100, 2));
        let mut config = EngineConfig::default();
        config.eq_enabled = true;
        config.set_eq_band_gain(2, 9.0);
        chain.apply(&config);
        assert!(chain.is_active());

        let input = tone(4096);
        let output = chain.process(input.clone());
        assert_eq!(output.len(), input.len());
        assert_ne!(output, input);
    }

    #[test]
    fn test_pitch_disabled_ignores_semitones() {
        let mut chain = DspChain::new(StreamFormat::new(44100, 2));
        let mut config = EngineConfig::default();
        config.set_pitch_semitones(5.0);
        chain.apply(&config);
        assert!(!chain.is_active());

        config.pitch_enabled = true;
        chain.apply(&config);
        assert!(chain.is_active());
    }

    #[test]
    fn test_speed_shortens_output() {
        let mut chain = DspChain::new(StreamFormat::new(44100, 2));
        let mut config = EngineConfig::default();
        config.set_speed(2.0);
        chain.apply(&config);

        let mut total = 0;
        for _ in 0..20 {
            total += chain.process(tone(2048)).len();
        }
        total += chain.flush().len();
        let expected = 20 * 2048 * 2 / 2;
        assert!((total as f64 - expected as f64).abs() / (expected as f64) < 0.05, "total {}", total);
    }
}
