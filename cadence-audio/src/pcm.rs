//! PCM blocks and stream formats exchanged between pipeline stages

use std::time::Duration;

/// Block of interleaved signed 16-bit samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    /// Interleaved samples, `frames() * channels` long
    pub samples: Vec<i16>,
    /// Channel count (1 or 2)
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Presentation timestamp of the first frame in milliseconds
    pub pts_ms: u64,
}

impl PcmFrame {
    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration covered by this block in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Format negotiated for one playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total duration if the container reports one
    pub duration_ms: Option<u64>,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            duration_ms: None,
        }
    }

    /// True when two formats can share one output sink
    pub fn is_compatible(&self, other: &StreamFormat) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Number of interleaved samples covering `duration`
    pub fn samples_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate as f64) as usize * self.channels as usize
    }
}

/// Convert an i16 sample to f32 in [-1.0, 1.0)
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert an f32 sample to i16 with saturation
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = PcmFrame {
            samples: vec![0; 88200],
            channels: 2,
            sample_rate: 44100,
            pts_ms: 0,
        };
        assert_eq!(frame.frames(), 44100);
        assert_eq!(frame.duration_ms(), 1000);
    }

    #[test]
    fn test_sample_conversion_saturates() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
        assert_eq!(f32_to_i16(i16_to_f32(1234)), 1234);
    }

    #[test]
    fn test_samples_for() {
        let format = StreamFormat::new(48000, 2);
        assert_eq!(format.samples_for(Duration::from_millis(100)), 9600);
    }
}
