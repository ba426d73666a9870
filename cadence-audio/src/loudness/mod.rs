//! Batch loudness measurement (ITU-R BS.1770-4 / EBU R128)
//!
//! Runs off the real-time path over a whole file:
//! - K-weighted 400ms blocks with a 100ms hop
//! - Integrated loudness with absolute (-70 LUFS) and relative (-10 LU) gates
//! - Sample peak, short-term (3s) maximum and an approximate loudness range
//!
//! [`find_trailing_silence`] lives here as well since it shares the decode
//! path; it locates a trailing fade for crossfade timing.

mod kweight;
mod silence;

pub use kweight::KWeighting;
pub use silence::{estimate_trailing_silence, find_trailing_silence, trailing_silence_in, SilenceInfo};

use crate::error::{DecodeError, LoudnessError};
use crate::pcm::StreamFormat;
use crate::source::{SourceDecoder, SymphoniaDecoder};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, warn};

/// Loudness reported when no block survives gating
pub const SILENCE_LUFS: f64 = -70.0;

/// Absolute gate in LUFS
const ABSOLUTE_GATE: f64 = -70.0;

/// Relative gate for integrated loudness in LU
const RELATIVE_GATE: f64 = -10.0;

/// Relative gate for loudness range in LU
const RANGE_RELATIVE_GATE: f64 = -20.0;

/// Hops per 400ms momentary block
const BLOCK_HOPS: usize = 4;

/// Hops per 3s short-term window
const SHORT_TERM_HOPS: usize = 30;

/// Floor for reported peak levels in dBFS
const PEAK_FLOOR_DB: f64 = -120.0;

/// Result of a batch loudness analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessReport {
    /// Gated integrated loudness in LUFS
    pub integrated_lufs: f64,
    /// Maximum absolute sample, linear (0.0 - 1.0)
    pub true_peak: f64,
    /// Maximum absolute sample in dBFS
    pub true_peak_dbfs: f64,
    /// Spread between the 10th and 95th percentile of short-term loudness
    pub loudness_range_lu: f64,
    /// Highest short-term (3s) loudness in LUFS
    pub short_term_max_lufs: f64,
    /// Sample frames analysed
    pub sample_frames: u64,
    pub duration_ms: u64,
}

/// Convert a mean-square power to LUFS
#[inline]
fn power_to_lufs(power: f64) -> f64 {
    -0.691 + 10.0 * power.log10()
}

/// Streaming gated loudness meter
pub struct GatedLoudnessMeter {
    sample_rate: u32,
    channels: usize,
    filters: Vec<KWeighting>,
    hop_frames: usize,
    /// Per-channel sum of squares in the hop being filled
    hop_sums: Vec<f64>,
    hop_filled: usize,
    /// Completed hops, each the per-channel-weighted sum of squares
    recent_hops: VecDeque<f64>,
    block_powers: Vec<f64>,
    short_term_powers: Vec<f64>,
    peak: f64,
    frames: u64,
}

impl GatedLoudnessMeter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = channels.clamp(1, 2) as usize;
        let sample_rate = sample_rate.max(1);
        Self {
            sample_rate,
            channels,
            filters: vec![KWeighting::new(sample_rate); channels],
            hop_frames: (sample_rate as usize / 10).max(1),
            hop_sums: vec![0.0; channels],
            hop_filled: 0,
            recent_hops: VecDeque::with_capacity(SHORT_TERM_HOPS),
            block_powers: Vec::new(),
            short_term_powers: Vec::new(),
            peak: 0.0,
            frames: 0,
        }
    }

    /// Feed interleaved samples
    pub fn push(&mut self, samples: &[i16]) {
        for frame in samples.chunks_exact(self.channels) {
            for ((&sample, filter), sum) in frame
                .iter()
                .zip(self.filters.iter_mut())
                .zip(self.hop_sums.iter_mut())
            {
                let value = sample as f64 / 32768.0;
                self.peak = self.peak.max(value.abs());
                let weighted = filter.process(value);
                *sum += weighted * weighted;
            }

            self.frames += 1;
            self.hop_filled += 1;
            if self.hop_filled == self.hop_frames {
                self.complete_hop();
            }
        }
    }

    fn complete_hop(&mut self) {
        // L/R channel weights are both 1.0
        let hop_energy: f64 = self.hop_sums.iter().sum();
        self.hop_sums.fill(0.0);
        self.hop_filled = 0;

        self.recent_hops.push_back(hop_energy);
        if self.recent_hops.len() > SHORT_TERM_HOPS {
            self.recent_hops.pop_front();
        }

        if self.recent_hops.len() >= BLOCK_HOPS {
            let energy: f64 = self.recent_hops.iter().rev().take(BLOCK_HOPS).sum();
            self.block_powers.push(energy / (BLOCK_HOPS * self.hop_frames) as f64);
        }
        if self.recent_hops.len() == SHORT_TERM_HOPS {
            let energy: f64 = self.recent_hops.iter().sum();
            self.short_term_powers.push(energy / (SHORT_TERM_HOPS * self.hop_frames) as f64);
        }
    }

    /// Gated integrated loudness of everything pushed so far
    pub fn integrated_lufs(&self) -> f64 {
        let above_absolute: Vec<f64> = self
            .block_powers
            .iter()
            .copied()
            .filter(|&p| power_to_lufs(p) > ABSOLUTE_GATE)
            .collect();
        if above_absolute.is_empty() {
            return SILENCE_LUFS;
        }

        let ungated = power_to_lufs(mean(&above_absolute));
        let threshold = ungated + RELATIVE_GATE;
        let gated: Vec<f64> = above_absolute
            .into_iter()
            .filter(|&p| power_to_lufs(p) > threshold)
            .collect();
        if gated.is_empty() {
            return SILENCE_LUFS;
        }

        power_to_lufs(mean(&gated))
    }

    /// Approximate loudness range in LU
    pub fn loudness_range(&self) -> f64 {
        let above_absolute: Vec<f64> = self
            .short_term_powers
            .iter()
            .copied()
            .filter(|&p| power_to_lufs(p) > ABSOLUTE_GATE)
            .collect();
        if above_absolute.len() < 2 {
            return 0.0;
        }

        let threshold = power_to_lufs(mean(&above_absolute)) + RANGE_RELATIVE_GATE;
        let mut levels: Vec<f64> = above_absolute
            .into_iter()
            .map(power_to_lufs)
            .filter(|&l| l > threshold)
            .collect();
        if levels.len() < 2 {
            return 0.0;
        }
        levels.sort_by(|a, b| a.total_cmp(b));

        let percentile = |p: f64| levels[((levels.len() - 1) as f64 * p).round() as usize];
        percentile(0.95) - percentile(0.10)
    }

    /// Highest short-term loudness, falling back to momentary blocks for
    /// material shorter than one short-term window
    pub fn short_term_max(&self) -> f64 {
        let powers = if self.short_term_powers.is_empty() {
            &self.block_powers
        } else {
            &self.short_term_powers
        };
        powers
            .iter()
            .map(|&p| power_to_lufs(p))
            .fold(SILENCE_LUFS, f64::max)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Produce the final report
    pub fn finish(&self) -> LoudnessReport {
        let true_peak_dbfs = if self.peak > 0.0 {
            (20.0 * self.peak.log10()).max(PEAK_FLOOR_DB)
        } else {
            PEAK_FLOOR_DB
        };

        LoudnessReport {
            integrated_lufs: self.integrated_lufs(),
            true_peak: self.peak,
            true_peak_dbfs,
            loudness_range_lu: self.loudness_range(),
            short_term_max_lufs: self.short_term_max(),
            sample_frames: self.frames,
            duration_ms: self.frames * 1000 / self.sample_rate as u64,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Measure interleaved samples already in memory
pub fn analyze_samples(samples: &[i16], format: StreamFormat) -> Result<LoudnessReport, LoudnessError> {
    if samples.len() < format.channels.max(1) as usize {
        return Err(LoudnessError::NoSamples);
    }
    let mut meter = GatedLoudnessMeter::new(format.sample_rate, format.channels);
    meter.push(samples);
    Ok(meter.finish())
}

/// Fully decode a file and measure it
pub fn analyze(path: &Path) -> Result<LoudnessReport, LoudnessError> {
    let mut decoder = SymphoniaDecoder::open(path)?;
    analyze_decoder(&mut decoder)
}

/// Measure everything a decoder produces
pub fn analyze_decoder(decoder: &mut dyn SourceDecoder) -> Result<LoudnessReport, LoudnessError> {
    let format = decoder.format();
    let mut meter = GatedLoudnessMeter::new(format.sample_rate, format.channels);

    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => meter.push(&frame.samples),
            Ok(None) => break,
            Err(DecodeError::Transient(msg)) => {
                warn!("Skipping undecodable packet: {}", msg);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if meter.frames() == 0 {
        return Err(LoudnessError::NoSamples);
    }

    let report = meter.finish();
    debug!(
        "Loudness: {:.2} LUFS, peak {:.2} dBFS, LRA {:.1} LU",
        report.integrated_lufs, report.true_peak_dbfs, report.loudness_range_lu
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn sine(freq: f64, amplitude: f64, sample_rate: u32, channels: u16, secs: f64) -> Vec<i16> {
        let frames = (sample_rate as f64 * secs) as usize;
        (0..frames)
            .flat_map(|i| {
                let t = i as f64 / sample_rate as f64;
                let value = ((2.0 * std::f64::consts::PI * freq * t).sin() * amplitude * 32767.0) as i16;
                std::iter::repeat(value).take(channels as usize)
            })
            .collect()
    }

    #[test]
    fn test_silence_is_floor() {
        let report = analyze_samples(&vec![0i16; 48000 * 2 * 5], StreamFormat::new(48000, 2)).unwrap();
        assert_eq!(report.integrated_lufs, -70.0);
        assert_eq!(report.true_peak, 0.0);
    }

    #[test]
    fn test_reference_tone_at_minus_23() {
        let amplitude = 10f64.powf(-23.0 / 20.0);
        let samples = sine(1000.0, amplitude, 48000, 2, 10.0);
        let report = analyze_samples(&samples, StreamFormat::new(48000, 2)).unwrap();
        assert!(
            (report.integrated_lufs + 23.0).abs() < 0.5,
            "got {} LUFS",
            report.integrated_lufs
        );
        assert!((report.short_term_max_lufs + 23.0).abs() < 0.5);
        assert!(report.loudness_range_lu < 0.5);
    }

    #[test]
    fn test_full_scale_mono_tone() {
        let samples = sine(1000.0, 1.0, 44100, 1, 5.0);
        let report = analyze_samples(&samples, StreamFormat::new(44100, 1)).unwrap();
        assert!(
            (report.integrated_lufs + 3.01).abs() < 0.5,
            "got {} LUFS",
            report.integrated_lufs
        );
        assert!(report.true_peak > 0.99);
        assert!(report.true_peak_dbfs > -0.1);
    }

    #[test]
    fn test_quiet_passage_is_gated() {
        let format = StreamFormat::new(48000, 2);
        let mut samples = sine(1000.0, 0.1, 48000, 2, 10.0);
        // A long passage 40dB down falls below the relative gate
        samples.extend(sine(1000.0, 0.001, 48000, 2, 10.0));
        let loud_only = analyze_samples(&sine(1000.0, 0.1, 48000, 2, 10.0), format).unwrap();
        let report = analyze_samples(&samples, format).unwrap();
        assert!((report.integrated_lufs - loud_only.integrated_lufs).abs() < 0.3);
    }

    #[test]
    fn test_loudness_range_spans_sections() {
        let format = StreamFormat::new(48000, 2);
        let mut samples = sine(1000.0, 0.1, 48000, 2, 10.0);
        samples.extend(sine(1000.0, 0.1 / 10f64.sqrt(), 48000, 2, 10.0));
        let report = analyze_samples(&samples, format).unwrap();
        // Sections sit 10dB apart
        assert!(
            (report.loudness_range_lu - 10.0).abs() < 1.5,
            "got {} LU",
            report.loudness_range_lu
        );
    }

    #[test]
    fn test_empty_input_is_error() {
        let result = analyze_samples(&[], StreamFormat::new(44100, 2));
        assert!(matches!(result, Err(LoudnessError::NoSamples)));
    }

    #[test]
    fn test_analyze_wav_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for sample in sine(1000.0, 10f64.powf(-18.0 / 20.0), 44100, 2, 4.0) {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let report = analyze(&path).unwrap();
        assert!((report.integrated_lufs + 18.0).abs() < 0.5);
        assert_eq!(report.sample_frames, 44100 * 4);
        assert_eq!(report.duration_ms, 4000);
    }
}
