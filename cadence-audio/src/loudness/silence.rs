//! Trailing silence detection for crossfade timing

use crate::error::{DecodeError, LoudnessError};
use crate::source::{SourceDecoder, SymphoniaDecoder};
use std::path::Path;
use tracing::{debug, warn};

/// RMS window length
const WINDOW_MS: u64 = 100;

/// Tracks at least this long get an estimated onset when analysis fails
const ESTIMATE_MIN_DURATION_MS: u64 = 120_000;

/// Percentage of the duration assumed to precede the trailing silence
const ESTIMATE_PERCENT: u64 = 97;

/// Where the trailing silence of a track begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceInfo {
    /// Onset of the trailing silent run in milliseconds
    pub onset_ms: u64,
    /// True when guessed from the duration instead of measured
    pub estimated: bool,
}

/// Rough onset guess for long tracks that could not be analysed
pub fn estimate_trailing_silence(duration_ms: u64) -> Option<SilenceInfo> {
    (duration_ms > ESTIMATE_MIN_DURATION_MS).then(|| SilenceInfo {
        onset_ms: duration_ms * ESTIMATE_PERCENT / 100,
        estimated: true,
    })
}

/// Scan the last `scan_secs` of a file in 100ms RMS windows and return the
/// start of the trailing run of windows quieter than `threshold_db` (dBFS)
///
/// `Ok(None)` means the track does not end in silence.
pub fn find_trailing_silence(
    path: &Path,
    scan_secs: f64,
    threshold_db: f64,
) -> Result<Option<SilenceInfo>, LoudnessError> {
    let mut decoder = SymphoniaDecoder::open(path)?;
    trailing_silence_in(&mut decoder, scan_secs, threshold_db)
}

/// Decoder-level variant of [`find_trailing_silence`]
pub fn trailing_silence_in(
    decoder: &mut dyn SourceDecoder,
    scan_secs: f64,
    threshold_db: f64,
) -> Result<Option<SilenceInfo>, LoudnessError> {
    let format = decoder.format();
    let scan_ms = (scan_secs.max(0.1) * 1000.0) as u64;

    if let Some(duration) = format.duration_ms {
        if duration > scan_ms {
            // A failed seek only costs time: the scan still finds the last run
            if let Err(e) = decoder.seek(duration - scan_ms) {
                debug!("Seek before silence scan failed, scanning from start: {}", e);
            }
        }
    }

    let threshold = 10f64.powf(threshold_db / 20.0);
    let channels = format.channels.max(1) as usize;
    let window_frames = (format.sample_rate as u64 * WINDOW_MS / 1000).max(1) as usize;

    let mut window_start_ms: Option<u64> = None;
    let mut window_sum = 0.0f64;
    let mut window_filled = 0usize;
    let mut silence_start: Option<u64> = None;

    let close_window = |start: u64, sum: f64, frames: usize, silence_start: &mut Option<u64>| {
        let rms = (sum / (frames * channels) as f64).sqrt();
        if rms < threshold {
            silence_start.get_or_insert(start);
        } else {
            *silence_start = None;
        }
    };

    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(DecodeError::Transient(msg)) => {
                warn!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        for (i, samples) in frame.samples.chunks_exact(channels).enumerate() {
            let start = *window_start_ms
                .get_or_insert(frame.pts_ms + i as u64 * 1000 / format.sample_rate as u64);
            window_sum += samples
                .iter()
                .map(|&s| {
                    let v = s as f64 / 32768.0;
                    v * v
                })
                .sum::<f64>();
            window_filled += 1;

            if window_filled == window_frames {
                close_window(start, window_sum, window_filled, &mut silence_start);
                window_start_ms = None;
                window_sum = 0.0;
                window_filled = 0;
            }
        }
    }

    if let (Some(start), true) = (window_start_ms, window_filled > 0) {
        close_window(start, window_sum, window_filled, &mut silence_start);
    }

    Ok(silence_start.map(|onset_ms| SilenceInfo {
        onset_ms,
        estimated: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_track(dir: &TempDir, tone_secs: f64, silence_secs: f64) -> std::path::PathBuf {
        let path = dir.path().join("track.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        let tone_frames = (44100.0 * tone_secs) as usize;
        let silence_frames = (44100.0 * silence_secs) as usize;
        for i in 0..tone_frames + silence_frames {
            let value = if i < tone_frames {
                ((i as f32 * 0.06).sin() * 12000.0) as i16
            } else {
                0
            };
            writer.write_sample(value).unwrap();
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_finds_trailing_silence() {
        let dir = TempDir::new().unwrap();
        let path = write_track(&dir, 3.0, 2.0);
        let info = find_trailing_silence(&path, 4.0, -50.0).unwrap().unwrap();
        assert!(!info.estimated);
        assert!((info.onset_ms as i64 - 3000).abs() <= 100, "onset {}", info.onset_ms);
    }

    #[test]
    fn test_no_trailing_silence() {
        let dir = TempDir::new().unwrap();
        let path = write_track(&dir, 3.0, 0.0);
        assert_eq!(find_trailing_silence(&path, 2.0, -50.0).unwrap(), None);
    }

    #[test]
    fn test_estimate_only_for_long_tracks() {
        assert_eq!(estimate_trailing_silence(60_000), None);
        let info = estimate_trailing_silence(200_000).unwrap();
        assert_eq!(info.onset_ms, 194_000);
        assert!(info.estimated);
    }
}
