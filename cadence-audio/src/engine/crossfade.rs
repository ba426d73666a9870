//! Crossfade timing and gain envelopes

use crate::config::{MAX_CROSSFADE_MS, MIN_CROSSFADE_MS};
use crate::loudness::SilenceInfo;
use std::f32::consts::FRAC_PI_2;

/// Number of discrete envelope steps
pub const CROSSFADE_STEPS: u32 = 50;

/// When and how long to crossfade out of the current track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossfadePlan {
    /// Position of the outgoing track where the fade starts
    pub start_at_ms: u64,
    pub length_ms: u64,
}

/// Plan the fade out of a track of `duration_ms`
///
/// The fade ends where the audible part of the track ends (the onset of its
/// trailing silence when known). With a tempo estimate the length is rounded
/// down to whole beats, never below the minimum crossfade length.
pub fn plan_crossfade(
    configured_ms: u64,
    duration_ms: u64,
    silence: Option<SilenceInfo>,
    bpm: Option<f32>,
) -> CrossfadePlan {
    let audible_end = silence
        .map(|s| s.onset_ms)
        .filter(|&onset| onset > 0 && onset < duration_ms)
        .unwrap_or(duration_ms);

    let mut length = configured_ms.clamp(MIN_CROSSFADE_MS, MAX_CROSSFADE_MS);

    if let Some(bpm) = bpm.filter(|b| b.is_finite() && *b > 0.0) {
        let beat_ms = 60_000.0 / bpm as f64;
        let beats = (length as f64 / beat_ms).floor();
        if beats >= 1.0 {
            length = ((beats * beat_ms) as u64).max(MIN_CROSSFADE_MS);
        }
    }

    let length_ms = length.min(audible_end);
    CrossfadePlan {
        start_at_ms: audible_end - length_ms,
        length_ms,
    }
}

/// Equal-power gains `(outgoing, incoming)` at `step` of [`CROSSFADE_STEPS`]
pub fn envelope(step: u32) -> (f32, f32) {
    let t = step.min(CROSSFADE_STEPS) as f32 / CROSSFADE_STEPS as f32;
    let angle = t * FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Step reached after `elapsed_ms` of a fade lasting `length_ms`
pub fn step_at(elapsed_ms: u64, length_ms: u64) -> u32 {
    if length_ms == 0 {
        return CROSSFADE_STEPS;
    }
    ((elapsed_ms * CROSSFADE_STEPS as u64 / length_ms) as u32).min(CROSSFADE_STEPS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_plan() {
        let plan = plan_crossfade(5000, 180_000, None, None);
        assert_eq!(plan, CrossfadePlan { start_at_ms: 175_000, length_ms: 5000 });
    }

    #[test]
    fn test_configured_length_clamped() {
        assert_eq!(plan_crossfade(200, 60_000, None, None).length_ms, MIN_CROSSFADE_MS);
        assert_eq!(plan_crossfade(60_000, 60_000, None, None).length_ms, MAX_CROSSFADE_MS);
    }

    #[test]
    fn test_fade_ends_at_trailing_silence() {
        let silence = SilenceInfo { onset_ms: 170_000, estimated: false };
        let plan = plan_crossfade(4000, 180_000, Some(silence), None);
        assert_eq!(plan.start_at_ms, 166_000);
    }

    #[test]
    fn test_length_snaps_to_beats() {
        // 120 BPM: 500ms beats, 4300ms -> 8 beats
        let plan = plan_crossfade(4300, 180_000, None, Some(120.0));
        assert_eq!(plan.length_ms, 4000);

        // 60 BPM keeps at least the minimum length
        let plan = plan_crossfade(1500, 180_000, None, Some(60.0));
        assert_eq!(plan.length_ms, 1000);
    }

    #[test]
    fn test_short_track_fades_whole_length() {
        let plan = plan_crossfade(4000, 2500, None, None);
        assert_eq!(plan, CrossfadePlan { start_at_ms: 0, length_ms: 2500 });
    }

    #[test]
    fn test_equal_power_envelope() {
        let (out, inc) = envelope(0);
        assert_eq!((out, inc), (1.0, 0.0));
        let (out, inc) = envelope(CROSSFADE_STEPS / 2);
        assert!((out * out + inc * inc - 1.0).abs() < 1e-6);
        assert!((out - inc).abs() < 1e-6);
        let (out, inc) = envelope(CROSSFADE_STEPS);
        assert!(out.abs() < 1e-6);
        assert!((inc - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_step_progression() {
        assert_eq!(step_at(0, 2000), 0);
        assert_eq!(step_at(1000, 2000), 25);
        assert_eq!(step_at(5000, 2000), CROSSFADE_STEPS);
        assert_eq!(step_at(10, 0), CROSSFADE_STEPS);
    }
}
