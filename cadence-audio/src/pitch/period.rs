//! Pitch period detection (AMDF)

/// Highest pitch searched for, in Hz
pub const MAX_PITCH_HZ: u32 = 400;

/// Lowest pitch searched for, in Hz
pub const MIN_PITCH_HZ: u32 = 65;

/// Rate the coarse AMDF search runs at
pub const AMDF_FREQ: u32 = 4000;

/// Result of one AMDF search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PeriodMatch {
    pub period: usize,
    /// Normalized difference of the best period
    pub min_diff: u64,
    /// Normalized difference of the worst period
    pub max_diff: u64,
}

/// Find the period in `[min_period, max_period]` whose shifted copy differs
/// least from the signal, normalized by period length
///
/// `samples` must hold at least `2 * max_period` mono values.
pub(crate) fn find_period_in_range(samples: &[i16], min_period: usize, max_period: usize) -> PeriodMatch {
    let mut best_period = 0usize;
    let mut worst_period = 255usize;
    let mut min_diff = 1u64;
    let mut max_diff = 0u64;

    for period in min_period..=max_period {
        let diff: u64 = samples[..period]
            .iter()
            .zip(samples[period..2 * period].iter())
            .map(|(&a, &b)| (a as i32 - b as i32).unsigned_abs() as u64)
            .sum();

        // diff/period < min_diff/best_period without division
        if best_period == 0 || diff * (best_period as u64) < min_diff * period as u64 {
            min_diff = diff;
            best_period = period;
        }
        if diff * worst_period as u64 > max_diff * period as u64 {
            max_diff = diff;
            worst_period = period;
        }
    }

    PeriodMatch {
        period: best_period,
        min_diff: min_diff / best_period.max(1) as u64,
        max_diff: max_diff / worst_period.max(1) as u64,
    }
}

/// Period detector with coarse downsampled search and local refinement
#[derive(Debug, Clone)]
pub(crate) struct PeriodDetector {
    channels: usize,
    min_period: usize,
    max_period: usize,
    max_required: usize,
    skip: usize,
    downsampled: Vec<i16>,
    prev_period: usize,
    prev_min_diff: u64,
}

impl PeriodDetector {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let min_period = (sample_rate / MAX_PITCH_HZ) as usize;
        let max_period = (sample_rate / MIN_PITCH_HZ) as usize;
        let max_required = 2 * max_period;
        let skip = if sample_rate > AMDF_FREQ {
            (sample_rate / AMDF_FREQ) as usize
        } else {
            1
        };

        Self {
            channels,
            min_period,
            max_period,
            max_required,
            skip,
            downsampled: Vec::with_capacity(max_required),
            prev_period: 0,
            prev_min_diff: 0,
        }
    }

    /// Frames of input needed for one detection
    pub fn max_required(&self) -> usize {
        self.max_required
    }

    pub fn period_bounds(&self) -> (usize, usize) {
        (self.min_period, self.max_period)
    }

    /// Average `skip`-frame groups of interleaved input into mono values
    fn downsample(&mut self, samples: &[i16], skip: usize) {
        let count = self.max_required / skip;
        let per_value = self.channels * skip;
        self.downsampled.clear();
        self.downsampled.extend(samples[..count * per_value].chunks_exact(per_value).map(|group| {
            let sum: i32 = group.iter().map(|&s| s as i32).sum();
            (sum / per_value as i32) as i16
        }));
    }

    /// Detect the pitch period at the start of `samples` (interleaved)
    ///
    /// Falls back to the previous period when the new match is clearly worse.
    pub fn find_period(&mut self, samples: &[i16], prefer_new: bool) -> usize {
        let found = if self.channels == 1 && self.skip == 1 {
            find_period_in_range(samples, self.min_period, self.max_period)
        } else {
            self.downsample(samples, self.skip);
            let coarse = find_period_in_range(
                &self.downsampled,
                self.min_period / self.skip,
                self.max_period / self.skip,
            );

            if self.skip == 1 {
                coarse
            } else {
                let period = coarse.period * self.skip;
                let low = period.saturating_sub(self.skip << 2).max(self.min_period);
                let high = (period + (self.skip << 2)).min(self.max_period);
                if self.channels == 1 {
                    find_period_in_range(samples, low, high)
                } else {
                    self.downsample(samples, 1);
                    find_period_in_range(&self.downsampled, low, high)
                }
            }
        };

        let period = if self.prev_period_better(&found, prefer_new) {
            self.prev_period
        } else {
            found.period
        };

        self.prev_min_diff = found.min_diff;
        self.prev_period = found.period;
        period
    }

    fn prev_period_better(&self, found: &PeriodMatch, prefer_new: bool) -> bool {
        if found.min_diff == 0 || self.prev_period == 0 {
            return false;
        }
        if prefer_new {
            if found.max_diff > found.min_diff * 3 {
                // A clear match for this period
                return false;
            }
            if found.min_diff * 2 <= self.prev_min_diff * 3 {
                return false;
            }
        } else if found.min_diff <= self.prev_min_diff {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn periodic(period: usize, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let phase = (i % period) as f32 / period as f32;
                ((2.0 * std::f32::consts::PI * phase).sin() * 12000.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_exact_period_is_found() {
        let samples = periodic(100, 1000);
        let found = find_period_in_range(&samples, 50, 300);
        assert_eq!(found.period, 100);
        assert_eq!(found.min_diff, 0);
    }

    #[test]
    fn test_detector_bounds() {
        let detector = PeriodDetector::new(44100, 2);
        assert_eq!(detector.period_bounds(), (110, 678));
        assert_eq!(detector.max_required(), 1356);
    }

    #[test]
    fn test_detector_finds_period_through_downsampling() {
        // 220 = 20 * skip keeps the downsampled copy exactly periodic
        let mut detector = PeriodDetector::new(44100, 1);
        let samples = periodic(220, 4000);
        let period = detector.find_period(&samples, true);
        assert!(
            period == 220 || period == 440 || period == 660,
            "period {}",
            period
        );
    }
}
