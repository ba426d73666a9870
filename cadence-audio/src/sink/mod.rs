//! Audio output sinks
//!
//! Pipelines push processed PCM into an [`AudioSink`]. Writes block for
//! buffer space, which paces the whole pipeline to real time. The default
//! implementation drives a cpal output stream through a ring buffer.

mod device;

pub use device::CpalSink;

use crate::error::DeviceError;
use crate::pcm::StreamFormat;
use std::time::Duration;

/// Change in output device availability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device temporarily taken by someone else
    TransientLoss,
    /// Device gone for good
    PermanentLoss,
    /// Exclusive access is back
    Regained,
}

/// Output for one pipeline
///
/// Sinks are created and used on the pipeline thread, so they need not be
/// `Send` (cpal streams are not on every platform).
pub trait AudioSink {
    /// Format accepted by `write`
    fn format(&self) -> StreamFormat;

    /// Queue interleaved samples, blocking up to `timeout` for space
    ///
    /// Returns the number of samples accepted: either all of them or none.
    fn write(&mut self, samples: &[i16], timeout: Duration) -> Result<usize, DeviceError>;

    /// Output gain (0.0 - 1.0)
    fn set_volume(&mut self, volume: f32);

    fn pause(&mut self) -> Result<(), DeviceError>;

    fn resume(&mut self) -> Result<(), DeviceError>;

    /// Drop everything queued but not yet played
    fn flush(&mut self);

    /// Wait until queued audio has played out; false on timeout
    fn drain(&mut self, timeout: Duration) -> bool;

    /// Next pending device availability change
    fn poll_event(&mut self) -> Option<DeviceEvent>;
}

/// Map interleaved frames between channel counts
///
/// Mono is duplicated, stereo to mono is averaged, extra output channels
/// beyond the first two are silent.
pub fn map_channels(input: &[f32], in_channels: usize, out_channels: usize, out: &mut Vec<f32>) {
    if in_channels == out_channels {
        out.extend_from_slice(input);
        return;
    }

    for frame in input.chunks_exact(in_channels) {
        match (in_channels, out_channels) {
            (_, 1) => out.push(frame.iter().sum::<f32>() / in_channels as f32),
            (1, n) => {
                out.push(frame[0]);
                out.push(frame[0]);
                out.extend(std::iter::repeat(0.0).take(n - 2));
            }
            (_, n) => {
                out.push(frame[0]);
                out.push(frame[1]);
                out.extend(std::iter::repeat(0.0).take(n.saturating_sub(2)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo() {
        let mut out = Vec::new();
        map_channels(&[0.5, -0.25], 1, 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.25, -0.25]);
    }

    #[test]
    fn test_stereo_to_mono() {
        let mut out = Vec::new();
        map_channels(&[0.5, 0.25, 1.0, 0.0], 2, 1, &mut out);
        assert_eq!(out, vec![0.375, 0.5]);
    }

    #[test]
    fn test_stereo_to_surround() {
        let mut out = Vec::new();
        map_channels(&[0.1, 0.2], 2, 4, &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.0, 0.0]);
    }
}
