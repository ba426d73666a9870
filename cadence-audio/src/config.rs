//! Engine settings and their persistence
//!
//! Stored as simple `key=value` lines. Missing or unparsable values fall back
//! to defaults, out-of-range values are clamped and unknown keys are ignored.

use crate::effects::{EQ_BANDS, EQ_MAX_GAIN_DB};
use crate::pitch::{MAX_SPEED, MIN_SPEED};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Crossfade length limits in milliseconds
pub const MIN_CROSSFADE_MS: u64 = 1000;
pub const MAX_CROSSFADE_MS: u64 = 12000;

/// Pitch limits exposed to users, in semitones
pub const MAX_PITCH_SEMITONES: f32 = 12.0;

/// Playback and DSP settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub volume: f32,
    pub speed: f32,
    pub pitch_semitones: f32,
    pub pitch_enabled: bool,

    pub gapless_enabled: bool,
    pub crossfade_enabled: bool,
    pub crossfade_ms: u64,

    pub eq_enabled: bool,
    pub eq_gains: [f32; EQ_BANDS],
    pub reverb_enabled: bool,
    pub reverb_mix: f32,
    pub reverb_decay: f32,

    pub pulse_enabled: bool,
    pub beat_sensitivity: f32,
    pub beat_cooldown_ms: f64,

    /// Seconds scanned at the end of a track when looking for silence
    pub silence_scan_secs: f64,
    /// RMS level (dBFS) below which a window counts as silent
    pub silence_threshold_db: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            speed: 1.0,
            pitch_semitones: 0.0,
            pitch_enabled: false,
            gapless_enabled: true,
            crossfade_enabled: false,
            crossfade_ms: 4000,
            eq_enabled: false,
            eq_gains: [0.0; EQ_BANDS],
            reverb_enabled: false,
            reverb_mix: 0.3,
            reverb_decay: 0.7,
            pulse_enabled: true,
            beat_sensitivity: 1.3,
            beat_cooldown_ms: 80.0,
            silence_scan_secs: 10.0,
            silence_threshold_db: -50.0,
        }
    }
}

impl EngineConfig {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be read.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self) -> io::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    /// Default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadence")
            .join("engine.conf")
    }

    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_finite() {
            self.volume = volume.clamp(0.0, 1.0);
        }
    }

    pub fn set_speed(&mut self, speed: f32) {
        if speed.is_finite() {
            self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        }
    }

    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        if semitones.is_finite() {
            self.pitch_semitones = semitones.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES);
        }
    }

    pub fn set_crossfade_ms(&mut self, ms: u64) {
        self.crossfade_ms = ms.clamp(MIN_CROSSFADE_MS, MAX_CROSSFADE_MS);
    }

    /// Out-of-range bands are ignored
    pub fn set_eq_band_gain(&mut self, band: usize, gain_db: f32) {
        if band < EQ_BANDS && gain_db.is_finite() {
            self.eq_gains[band] = gain_db.clamp(-EQ_MAX_GAIN_DB, EQ_MAX_GAIN_DB);
        }
    }

    pub fn set_reverb_mix(&mut self, mix: f32) {
        if mix.is_finite() {
            self.reverb_mix = mix.clamp(0.0, 1.0);
        }
    }

    pub fn set_reverb_decay(&mut self, decay: f32) {
        if decay.is_finite() {
            self.reverb_decay = decay.clamp(0.0, 0.98);
        }
    }

    pub fn set_beat_sensitivity(&mut self, sensitivity: f32) {
        if sensitivity.is_finite() {
            self.beat_sensitivity = sensitivity.clamp(0.5, 4.0);
        }
    }

    pub fn set_beat_cooldown_ms(&mut self, cooldown_ms: f64) {
        if cooldown_ms.is_finite() {
            self.beat_cooldown_ms = cooldown_ms.clamp(20.0, 1000.0);
        }
    }

    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let float = || value.parse::<f32>().ok();
            let flag = || value.parse::<bool>().ok();

            match key.trim() {
                "volume" => float().into_iter().for_each(|v| config.set_volume(v)),
                "speed" => float().into_iter().for_each(|v| config.set_speed(v)),
                "pitch_semitones" => float().into_iter().for_each(|v| config.set_pitch_semitones(v)),
                "pitch_enabled" => config.pitch_enabled = flag().unwrap_or(config.pitch_enabled),
                "gapless_enabled" => config.gapless_enabled = flag().unwrap_or(config.gapless_enabled),
                "crossfade_enabled" => {
                    config.crossfade_enabled = flag().unwrap_or(config.crossfade_enabled)
                }
                "crossfade_ms" => {
                    if let Ok(ms) = value.parse::<u64>() {
                        config.set_crossfade_ms(ms);
                    }
                }
                "eq_enabled" => config.eq_enabled = flag().unwrap_or(config.eq_enabled),
                "eq_gains" => {
                    for (band, gain) in value.split(',').enumerate() {
                        if let Ok(gain) = gain.trim().parse::<f32>() {
                            config.set_eq_band_gain(band, gain);
                        }
                    }
                }
                "reverb_enabled" => config.reverb_enabled = flag().unwrap_or(config.reverb_enabled),
                "reverb_mix" => float().into_iter().for_each(|v| config.set_reverb_mix(v)),
                "reverb_decay" => float().into_iter().for_each(|v| config.set_reverb_decay(v)),
                "pulse_enabled" => config.pulse_enabled = flag().unwrap_or(config.pulse_enabled),
                "beat_sensitivity" => float().into_iter().for_each(|v| config.set_beat_sensitivity(v)),
                "beat_cooldown_ms" => {
                    if let Ok(ms) = value.parse::<f64>() {
                        config.set_beat_cooldown_ms(ms);
                    }
                }
                "silence_scan_secs" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        config.silence_scan_secs = secs.clamp(1.0, 60.0);
                    }
                }
                "silence_threshold_db" => {
                    if let Ok(db) = value.parse::<f64>() {
                        config.silence_threshold_db = db.clamp(-120.0, 0.0);
                    }
                }
                _ => {} // Ignore unknown keys
            }
        }

        config
    }

    fn serialize(&self) -> String {
        let gains: Vec<String> = self.eq_gains.iter().map(|g| g.to_string()).collect();
        let lines = [
            "# Cadence engine configuration".to_string(),
            format!("volume={}", self.volume),
            format!("speed={}", self.speed),
            format!("pitch_semitones={}", self.pitch_semitones),
            format!("pitch_enabled={}", self.pitch_enabled),
            format!("gapless_enabled={}", self.gapless_enabled),
            format!("crossfade_enabled={}", self.crossfade_enabled),
            format!("crossfade_ms={}", self.crossfade_ms),
            format!("eq_enabled={}", self.eq_enabled),
            format!("eq_gains={}", gains.join(",")),
            format!("reverb_enabled={}", self.reverb_enabled),
            format!("reverb_mix={}", self.reverb_mix),
            format!("reverb_decay={}", self.reverb_decay),
            format!("pulse_enabled={}", self.pulse_enabled),
            format!("beat_sensitivity={}", self.beat_sensitivity),
            format!("beat_cooldown_ms={}", self.beat_cooldown_ms),
            format!("silence_scan_secs={}", self.silence_scan_secs),
            format!("silence_threshold_db={}", self.silence_threshold_db),
        ];
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty() {
        assert_eq!(EngineConfig::parse(""), EngineConfig::default());
    }

    #[test]
    fn test_parse_clamps_values() {
        let config = EngineConfig::parse("volume=3.0\nspeed=0.1\npitch_semitones=-30\ncrossfade_ms=50000");
        assert_eq!(config.volume, 1.0);
        assert_eq!(config.speed, MIN_SPEED);
        assert_eq!(config.pitch_semitones, -12.0);
        assert_eq!(config.crossfade_ms, MAX_CROSSFADE_MS);
    }

    #[test]
    fn test_parse_ignores_unknown_and_garbage() {
        let content = "# Comment\nmystery=1\nvolume=loud\nreverb_mix=0.5\nnot a pair";
        let config = EngineConfig::parse(content);
        assert_eq!(config.volume, 1.0);
        assert_eq!(config.reverb_mix, 0.5);
    }

    #[test]
    fn test_eq_gains_list() {
        let config = EngineConfig::parse("eq_gains=3, -4.5, 20, x");
        assert_eq!(config.eq_gains, [3.0, -4.5, 12.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invalid_band_ignored() {
        let mut config = EngineConfig::default();
        config.set_eq_band_gain(9, 6.0);
        assert_eq!(config.eq_gains, [0.0; EQ_BANDS]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("engine.conf");

        let mut config = EngineConfig::default();
        config.crossfade_enabled = true;
        config.set_crossfade_ms(6000);
        config.set_eq_band_gain(1, -3.0);
        config.save_to(&path).unwrap();

        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }
}
