//! Real-time spectral pulse analysis for visualization
//!
//! Accumulates a mono-downmixed copy of the playback PCM into a circular
//! window, and at most once per minimum interval runs a Hamming-windowed FFT
//! over the latest 2048 samples. Each analysis produces a [`PulseSnapshot`]
//! with seven smoothed musical bands, a 32-bin log-spaced spectrum, beat and
//! tempo information, spectral flux and centroid.
//!
//! The analyzer never touches the audio it observes.

use crate::beat::{BeatDetector, BeatSettings};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Analysis window length in mono samples
pub const FFT_SIZE: usize = 2048;

/// Number of musical bands in a snapshot
pub const PULSE_BANDS: usize = 7;

/// Number of log-spaced bins in the display spectrum
pub const SPECTRUM_BINS: usize = 32;

/// Number of points in the snapshot waveform
pub const WAVEFORM_POINTS: usize = 128;

/// Lower edges of the musical bands in Hz; the last band is open-ended
const BAND_EDGES: [f32; PULSE_BANDS + 1] = [20.0, 60.0, 250.0, 500.0, 2000.0, 4000.0, 6000.0, f32::MAX];

/// Per-band smoothing (rise, fall): bass reacts fastest, brilliance slowest
const BAND_SMOOTHING: [(f32, f32); PULSE_BANDS] = [
    (0.75, 0.35),
    (0.70, 0.30),
    (0.55, 0.22),
    (0.45, 0.18),
    (0.38, 0.14),
    (0.32, 0.11),
    (0.25, 0.08),
];

/// Frequency used to normalize the spectral centroid
const CENTROID_CEILING_HZ: f32 = 8000.0;

/// Decay of the beat indicator per analysis frame
const BEAT_DECAY: f32 = 0.85;

/// Frame maxima below this are treated as silence
const SILENCE_MAGNITUDE: f32 = 1e-4;

/// Analyzer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseConfig {
    /// Beat detection thresholds
    pub beat: BeatSettings,
    /// Minimum stream time between two analyses (16ms caps output at ~60/s)
    pub min_interval_ms: f64,
    /// Minimum number of new mono samples before the next analysis
    pub hop_size: usize,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            beat: BeatSettings::default(),
            min_interval_ms: 16.0,
            hop_size: 512,
        }
    }
}

/// One published analysis result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseSnapshot {
    /// Smoothed levels: sub-bass, bass, low-mid, mid, high-mid, treble, brilliance
    pub bands: [f32; PULSE_BANDS],
    /// Aggregate low band (sub-bass + bass)
    pub bass: f32,
    /// Aggregate mid band (low-mid, mid, high-mid)
    pub mid: f32,
    /// Aggregate high band (treble + brilliance)
    pub treble: f32,
    /// RMS energy of the analysis window (0.0 - 1.0)
    pub energy: f32,
    /// Peak absolute sample since the previous analysis (0.0 - 1.0)
    pub peak: f32,
    /// Beat indicator, 1.0 on a beat and decaying afterwards
    pub beat: f32,
    /// True only for the snapshot in which a beat fired
    pub on_beat: bool,
    /// Smoothed tempo estimate, 0.0 until known
    pub bpm: f32,
    /// Onset strength: RMS of positive magnitude changes
    pub flux: f32,
    /// Spectral centroid normalized to 0.0 - 1.0
    pub centroid: f32,
    /// Log-spaced magnitude spectrum (0.0 - 1.0)
    pub spectrum: [f32; SPECTRUM_BINS],
    /// Downsampled window contents (-1.0 - 1.0)
    pub waveform: [f32; WAVEFORM_POINTS],
    /// Stream time of the analysis in milliseconds
    pub timestamp_ms: f64,
}

impl Default for PulseSnapshot {
    fn default() -> Self {
        Self {
            bands: [0.0; PULSE_BANDS],
            bass: 0.0,
            mid: 0.0,
            treble: 0.0,
            energy: 0.0,
            peak: 0.0,
            beat: 0.0,
            on_beat: false,
            bpm: 0.0,
            flux: 0.0,
            centroid: 0.0,
            spectrum: [0.0; SPECTRUM_BINS],
            waveform: [0.0; WAVEFORM_POINTS],
            timestamp_ms: 0.0,
        }
    }
}

/// Real-time FFT analyzer producing [`PulseSnapshot`]s
pub struct SpectralPulseAnalyzer {
    config: PulseConfig,
    sample_rate: u32,
    channels: usize,
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    previous_magnitudes: Vec<f32>,
    spectrum_ranges: [(usize, usize); SPECTRUM_BINS],
    /// Circular mono history
    ring: Vec<f32>,
    write_pos: usize,
    new_samples: usize,
    /// Mono samples consumed since configure, used as the stream clock
    total_samples: u64,
    last_analysis_ms: Option<f64>,
    pending_peak: f32,
    bands: [f32; PULSE_BANDS],
    spectrum: [f32; SPECTRUM_BINS],
    beat_level: f32,
    beat_detector: BeatDetector,
    snapshot: PulseSnapshot,
}

impl SpectralPulseAnalyzer {
    /// Create an analyzer for the given stream format
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self::with_config(sample_rate, channels, PulseConfig::default())
    }

    /// Create an analyzer with explicit thresholds
    pub fn with_config(sample_rate: u32, channels: u16, config: PulseConfig) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        // Hamming window
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (FFT_SIZE - 1) as f32).cos())
            .collect();

        let mut analyzer = Self {
            config,
            sample_rate: sample_rate.max(1),
            channels: channels.max(1) as usize,
            fft,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            magnitudes: vec![0.0; FFT_SIZE / 2],
            previous_magnitudes: vec![0.0; FFT_SIZE / 2],
            spectrum_ranges: [(0, 0); SPECTRUM_BINS],
            ring: vec![0.0; FFT_SIZE],
            write_pos: 0,
            new_samples: 0,
            total_samples: 0,
            last_analysis_ms: None,
            pending_peak: 0.0,
            bands: [0.0; PULSE_BANDS],
            spectrum: [0.0; SPECTRUM_BINS],
            beat_level: 0.0,
            beat_detector: BeatDetector::new(config.beat),
            snapshot: PulseSnapshot::default(),
        };
        analyzer.configure(sample_rate, channels);
        analyzer
    }

    /// Reconfigure for a new stream format, clearing all history
    pub fn configure(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate.max(1);
        self.channels = channels.clamp(1, 2) as usize;
        self.spectrum_ranges = Self::spectrum_ranges(self.sample_rate);
        self.reset();
    }

    /// Log-spaced display bins (20Hz - 20kHz) mapped to FFT bin ranges
    fn spectrum_ranges(sample_rate: u32) -> [(usize, usize); SPECTRUM_BINS] {
        let bin_width = sample_rate as f32 / FFT_SIZE as f32;
        let min_freq = 20.0f32;
        let max_freq = 20000.0f32.min(sample_rate as f32 / 2.0);
        let log_min = min_freq.ln();
        let log_max = max_freq.ln();

        let mut ranges = [(0usize, 0usize); SPECTRUM_BINS];
        for (i, range) in ranges.iter_mut().enumerate() {
            let t0 = i as f32 / SPECTRUM_BINS as f32;
            let t1 = (i + 1) as f32 / SPECTRUM_BINS as f32;
            let low = (log_min + t0 * (log_max - log_min)).exp();
            let high = (log_min + t1 * (log_max - log_min)).exp();
            let start = ((low / bin_width) as usize).min(FFT_SIZE / 2 - 1);
            // Every display bin covers at least one FFT bin
            let end = ((high / bin_width) as usize).clamp(start + 1, FFT_SIZE / 2);
            *range = (start, end);
        }
        ranges
    }

    /// Replace the analysis thresholds
    pub fn set_config(&mut self, config: PulseConfig) {
        self.config = config;
        self.beat_detector.set_settings(config.beat);
    }

    /// Current configuration
    pub fn config(&self) -> PulseConfig {
        self.config
    }

    /// Feed interleaved 16-bit PCM
    ///
    /// Returns true when at least one new snapshot was produced.
    pub fn process_samples(&mut self, samples: &[i16]) -> bool {
        let mut produced = false;

        for frame in samples.chunks_exact(self.channels) {
            let mono = frame.iter().map(|&s| s as f32).sum::<f32>()
                / (self.channels as f32 * 32768.0);

            self.ring[self.write_pos] = mono;
            self.write_pos = (self.write_pos + 1) % FFT_SIZE;
            self.new_samples += 1;
            self.total_samples += 1;
            self.pending_peak = self.pending_peak.max(mono.abs());

            if self.new_samples >= self.config.hop_size && self.interval_elapsed() {
                self.analyze();
                produced = true;
            }
        }

        produced
    }

    /// Stream time in milliseconds
    fn now_ms(&self) -> f64 {
        self.total_samples as f64 * 1000.0 / self.sample_rate as f64
    }

    fn interval_elapsed(&self) -> bool {
        self.last_analysis_ms
            .map_or(true, |last| self.now_ms() - last >= self.config.min_interval_ms)
    }

    /// Run one FFT analysis over the current window
    fn analyze(&mut self) {
        let now = self.now_ms();
        self.new_samples = 0;
        self.last_analysis_ms = Some(now);

        // Unroll the ring oldest-first into the windowed FFT buffer
        let mut sum_squares = 0.0f32;
        for i in 0..FFT_SIZE {
            let sample = self.ring[(self.write_pos + i) % FFT_SIZE];
            sum_squares += sample * sample;
            self.fft_buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.fft_buffer);

        for (mag, bin) in self.magnitudes.iter_mut().zip(self.fft_buffer.iter()) {
            *mag = bin.norm();
        }

        let max_magnitude = self.magnitudes.iter().cloned().fold(0.0f32, f32::max);
        if max_magnitude > SILENCE_MAGNITUDE {
            for mag in &mut self.magnitudes {
                *mag /= max_magnitude;
            }
        } else {
            self.magnitudes.fill(0.0);
        }

        let raw_bands = self.band_levels();
        for (i, (level, &target)) in self.bands.iter_mut().zip(raw_bands.iter()).enumerate() {
            let (rise, fall) = BAND_SMOOTHING[i];
            let coeff = if target > *level { rise } else { fall };
            *level += (target - *level) * coeff;
        }

        self.update_spectrum();

        let flux = self.spectral_flux();
        let centroid = self.spectral_centroid();
        self.previous_magnitudes.copy_from_slice(&self.magnitudes);

        let beat_energy = raw_bands[0] + raw_bands[1];
        let on_beat = self.beat_detector.process(beat_energy, now);
        self.beat_level = if on_beat { 1.0 } else { self.beat_level * BEAT_DECAY };

        let mut waveform = [0.0f32; WAVEFORM_POINTS];
        let stride = FFT_SIZE / WAVEFORM_POINTS;
        for (i, point) in waveform.iter_mut().enumerate() {
            *point = self.ring[(self.write_pos + i * stride) % FFT_SIZE];
        }

        let b = &self.bands;
        self.snapshot = PulseSnapshot {
            bands: *b,
            bass: (b[0] + b[1]) * 0.5,
            mid: (b[2] + b[3] + b[4]) / 3.0,
            treble: (b[5] + b[6]) * 0.5,
            energy: (sum_squares / FFT_SIZE as f32).sqrt().min(1.0),
            peak: self.pending_peak.min(1.0),
            beat: self.beat_level,
            on_beat,
            bpm: self.beat_detector.bpm().unwrap_or(0.0),
            flux,
            centroid,
            spectrum: self.spectrum,
            waveform,
            timestamp_ms: now,
        };
        self.pending_peak = 0.0;
    }

    /// Unsmoothed mean normalized magnitude of each musical band
    fn band_levels(&self) -> [f32; PULSE_BANDS] {
        let bin_hz = self.sample_rate as f32 / FFT_SIZE as f32;
        let mut sums = [0.0f32; PULSE_BANDS];
        let mut counts = [0usize; PULSE_BANDS];

        for (i, &mag) in self.magnitudes.iter().enumerate().skip(1) {
            let freq = i as f32 * bin_hz;
            if let Some(band) = (0..PULSE_BANDS).find(|&b| freq >= BAND_EDGES[b] && freq < BAND_EDGES[b + 1]) {
                sums[band] += mag;
                counts[band] += 1;
            }
        }

        let mut levels = [0.0f32; PULSE_BANDS];
        for band in 0..PULSE_BANDS {
            if counts[band] > 0 {
                levels[band] = (sums[band] / counts[band] as f32).clamp(0.0, 1.0);
            }
        }
        levels
    }

    fn update_spectrum(&mut self) {
        for (value, &(start, end)) in self.spectrum.iter_mut().zip(self.spectrum_ranges.iter()) {
            let slice = &self.magnitudes[start..end];
            let level = slice.iter().sum::<f32>() / slice.len() as f32;
            *value = *value * 0.6 + level.clamp(0.0, 1.0) * 0.4;
        }
    }

    fn spectral_flux(&self) -> f32 {
        let sum: f32 = self
            .magnitudes
            .iter()
            .zip(self.previous_magnitudes.iter())
            .map(|(current, previous)| {
                let rise = (current - previous).max(0.0);
                rise * rise
            })
            .sum();
        (sum / self.magnitudes.len() as f32).sqrt()
    }

    fn spectral_centroid(&self) -> f32 {
        let bin_hz = self.sample_rate as f32 / FFT_SIZE as f32;
        let (weighted, total) = self
            .magnitudes
            .iter()
            .enumerate()
            .fold((0.0f32, 0.0f32), |(weighted, total), (i, &mag)| {
                (weighted + i as f32 * bin_hz * mag, total + mag)
            });

        if total > 0.0 {
            (weighted / total / CENTROID_CEILING_HZ).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Latest analysis result
    pub fn snapshot(&self) -> PulseSnapshot {
        self.snapshot
    }

    /// Current tempo estimate
    pub fn bpm(&self) -> Option<f32> {
        self.beat_detector.bpm()
    }

    /// Sample rate the analyzer is configured for
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clear all history and smoothing state
    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.write_pos = 0;
        self.new_samples = 0;
        self.total_samples = 0;
        self.last_analysis_ms = None;
        self.pending_peak = 0.0;
        self.previous_magnitudes.fill(0.0);
        self.bands = [0.0; PULSE_BANDS];
        self.spectrum = [0.0; SPECTRUM_BINS];
        self.beat_level = 0.0;
        self.beat_detector.reset();
        self.snapshot = PulseSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, frames: usize, amplitude: f32) -> Vec<i16> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                ((2.0 * PI * freq * t).sin() * amplitude * 32767.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_silence_produces_flat_snapshot() {
        let mut analyzer = SpectralPulseAnalyzer::new(44100, 2);
        assert!(analyzer.process_samples(&vec![0i16; 8192]));
        let snapshot = analyzer.snapshot();
        assert!(snapshot.bands.iter().all(|&b| b == 0.0));
        assert_eq!(snapshot.energy, 0.0);
        assert!(!snapshot.on_beat);
    }

    #[test]
    fn test_tone_lands_in_matching_band() {
        let mut analyzer = SpectralPulseAnalyzer::new(44100, 1);
        for chunk in sine(1000.0, 44100, 44100, 0.5).chunks(512) {
            analyzer.process_samples(chunk);
        }
        let snapshot = analyzer.snapshot();
        let loudest = snapshot
            .bands
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        // 1kHz belongs to the 500-2000Hz mid band
        assert_eq!(loudest, 3);
        assert!(snapshot.centroid > 0.05 && snapshot.centroid < 0.4);
        assert!(snapshot.energy > 0.3);
    }

    #[test]
    fn test_analysis_is_throttled() {
        let mut analyzer = SpectralPulseAnalyzer::new(48000, 1);
        let mut count = 0;
        // One second of audio in small chunks
        for chunk in sine(440.0, 48000, 48000, 0.3).chunks(128) {
            if analyzer.process_samples(chunk) {
                count += 1;
            }
        }
        assert!(count <= 63, "too many analyses: {}", count);
        assert!(count >= 30, "too few analyses: {}", count);
    }

    #[test]
    fn test_bass_pulses_at_120_bpm() {
        let sample_rate = 44100;
        let beat_period = sample_rate as usize / 2;
        let burst = sample_rate as usize / 50; // 20ms
        let mut analyzer = SpectralPulseAnalyzer::new(sample_rate, 1);

        let signal: Vec<i16> = (0..sample_rate as usize * 12)
            .map(|i| {
                let offset = i % beat_period;
                if offset < burst {
                    let t = offset as f32 / sample_rate as f32;
                    ((2.0 * PI * 80.0 * t).sin() * 0.8 * 32767.0) as i16
                } else {
                    0
                }
            })
            .collect();

        let mut beats = 0;
        for chunk in signal.chunks(512) {
            if analyzer.process_samples(chunk) && analyzer.snapshot().on_beat {
                beats += 1;
            }
        }

        assert!(beats >= 20, "expected a beat per pulse, got {}", beats);
        let bpm = analyzer.bpm().expect("tempo should be detected");
        assert!((bpm - 120.0).abs() <= 2.0, "expected 120 +/- 2 BPM, got {}", bpm);
    }

    #[test]
    fn test_flux_rises_on_onset() {
        let mut analyzer = SpectralPulseAnalyzer::new(44100, 1);
        analyzer.process_samples(&vec![0i16; 4096]);
        let quiet_flux = analyzer.snapshot().flux;
        analyzer.process_samples(&sine(3000.0, 44100, 2048, 0.8));
        assert!(analyzer.snapshot().flux > quiet_flux);
    }

    #[test]
    fn test_reset_clears_snapshot() {
        let mut analyzer = SpectralPulseAnalyzer::new(44100, 1);
        analyzer.process_samples(&sine(200.0, 44100, 8192, 0.8));
        analyzer.reset();
        assert_eq!(analyzer.snapshot(), PulseSnapshot::default());
    }
}
