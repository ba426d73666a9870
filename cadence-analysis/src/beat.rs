//! Beat detection and BPM estimation from a per-frame bass energy signal

use std::collections::VecDeque;

/// Number of beat-energy values kept for the adaptive threshold
const ENERGY_HISTORY: usize = 30;

/// Number of beat timestamps kept for tempo estimation
const BEAT_HISTORY: usize = 16;

/// Inter-beat intervals outside this range (ms) are ignored
const MIN_INTERVAL_MS: f64 = 250.0;
const MAX_INTERVAL_MS: f64 = 2000.0;

/// Accepted tempo range
const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;

/// Weight of a new tempo estimate in the exponential smoothing
const BPM_SMOOTHING: f32 = 0.2;

/// Tunable thresholds for beat detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatSettings {
    /// Standard deviations above the mean energy needed to fire a beat
    pub sensitivity: f32,
    /// Minimum time between two beats in milliseconds
    pub cooldown_ms: f64,
    /// Absolute beat-energy floor below which no beat fires
    pub floor: f32,
}

impl Default for BeatSettings {
    fn default() -> Self {
        Self {
            sensitivity: 1.3,
            cooldown_ms: 80.0,
            floor: 0.1,
        }
    }
}

/// Adaptive-threshold beat detector
///
/// Fed once per analysis frame with the combined sub-bass + bass energy and the
/// stream time of that frame. A beat fires when the energy rises above
/// `mean + stddev * sensitivity` of the recent history, the cooldown has
/// elapsed and the absolute floor is exceeded.
pub struct BeatDetector {
    settings: BeatSettings,
    energy_history: VecDeque<f32>,
    beat_times: VecDeque<f64>,
    last_beat_ms: Option<f64>,
    bpm: Option<f32>,
}

impl BeatDetector {
    /// Create a new detector
    pub fn new(settings: BeatSettings) -> Self {
        Self {
            settings,
            energy_history: VecDeque::with_capacity(ENERGY_HISTORY),
            beat_times: VecDeque::with_capacity(BEAT_HISTORY),
            last_beat_ms: None,
            bpm: None,
        }
    }

    /// Replace the detection thresholds without losing history
    pub fn set_settings(&mut self, settings: BeatSettings) {
        self.settings = settings;
    }

    /// Current thresholds
    pub fn settings(&self) -> BeatSettings {
        self.settings
    }

    /// Feed one energy value; returns true when a beat fires
    pub fn process(&mut self, energy: f32, now_ms: f64) -> bool {
        let (mean, std_dev) = self.statistics();

        let threshold = mean + std_dev * self.settings.sensitivity;
        let cooled_down = self
            .last_beat_ms
            .map_or(true, |last| now_ms - last >= self.settings.cooldown_ms);

        let is_beat = energy > threshold && energy > self.settings.floor && cooled_down;

        self.energy_history.push_back(energy);
        if self.energy_history.len() > ENERGY_HISTORY {
            self.energy_history.pop_front();
        }

        if is_beat {
            self.register_beat(now_ms);
        }

        is_beat
    }

    /// Mean and standard deviation of the energy history
    fn statistics(&self) -> (f32, f32) {
        if self.energy_history.is_empty() {
            return (0.0, 0.0);
        }

        let n = self.energy_history.len() as f32;
        let mean = self.energy_history.iter().sum::<f32>() / n;
        let variance = self
            .energy_history
            .iter()
            .map(|e| (e - mean) * (e - mean))
            .sum::<f32>()
            / n;

        (mean, variance.sqrt())
    }

    fn register_beat(&mut self, now_ms: f64) {
        self.last_beat_ms = Some(now_ms);
        self.beat_times.push_back(now_ms);
        if self.beat_times.len() > BEAT_HISTORY {
            self.beat_times.pop_front();
        }

        if let Some(estimate) = self.estimate_bpm() {
            self.bpm = Some(match self.bpm {
                Some(current) => current * (1.0 - BPM_SMOOTHING) + estimate * BPM_SMOOTHING,
                None => estimate,
            });
        }
    }

    /// Average the plausible inter-beat intervals into a tempo
    fn estimate_bpm(&self) -> Option<f32> {
        let (sum, count) = self
            .beat_times
            .iter()
            .zip(self.beat_times.iter().skip(1))
            .map(|(a, b)| b - a)
            .filter(|interval| (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(interval))
            .fold((0.0, 0usize), |(sum, count), interval| (sum + interval, count + 1));

        if count == 0 {
            return None;
        }

        let bpm = (60_000.0 / (sum / count as f64)) as f32;
        (MIN_BPM..=MAX_BPM).contains(&bpm).then_some(bpm)
    }

    /// Smoothed tempo estimate, if enough beats were seen
    pub fn bpm(&self) -> Option<f32> {
        self.bpm
    }

    /// Number of beats currently in the tempo window
    pub fn beat_count(&self) -> usize {
        self.beat_times.len()
    }

    /// Clear all history
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.beat_times.clear();
        self.last_beat_ms = None;
        self.bpm = None;
    }
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(BeatSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_pulses_give_tempo() {
        let mut detector = BeatDetector::default();
        // One frame every 20ms, a strong pulse every 500ms (120 BPM)
        for frame in 0..1000 {
            let now = frame as f64 * 20.0;
            let energy = if frame % 25 == 0 { 1.0 } else { 0.05 };
            detector.process(energy, now);
        }
        let bpm = detector.bpm().expect("tempo should be detected");
        assert!((bpm - 120.0).abs() < 1.0, "expected ~120 BPM, got {}", bpm);
    }

    #[test]
    fn test_cooldown_suppresses_double_triggers() {
        let mut detector = BeatDetector::default();
        assert!(detector.process(1.0, 0.0));
        // 40ms later is inside the 80ms cooldown
        assert!(!detector.process(5.0, 40.0));
        assert!(detector.process(50.0, 120.0));
    }

    #[test]
    fn test_floor_blocks_quiet_signal() {
        let mut detector = BeatDetector::default();
        for frame in 0..100 {
            let energy = if frame % 10 == 0 { 0.05 } else { 0.0 };
            assert!(!detector.process(energy, frame as f64 * 20.0));
        }
        assert!(detector.bpm().is_none());
    }

    #[test]
    fn test_implausible_tempo_is_rejected() {
        let mut detector = BeatDetector::default();
        // Pulses every 240ms = 250 BPM, intervals fall below the 250ms window
        for frame in 0..200 {
            let energy = if frame % 12 == 0 { 1.0 } else { 0.0 };
            detector.process(energy, frame as f64 * 20.0);
        }
        assert!(detector.bpm().is_none());
    }

    #[test]
    fn test_reset() {
        let mut detector = BeatDetector::default();
        detector.process(1.0, 0.0);
        detector.process(1.0, 500.0);
        detector.reset();
        assert_eq!(detector.beat_count(), 0);
        assert!(detector.bpm().is_none());
    }
}
