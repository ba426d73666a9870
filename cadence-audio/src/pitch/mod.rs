//! Time-domain pitch and tempo shifting (WSOLA)
//!
//! Pitch is decoupled from tempo in two steps:
//!
//! 1. Time-scale by `speed / pitch` with pitch-synchronous overlap-add. The
//!    pitch period is detected with AMDF on a downsampled mono copy; to
//!    compress, one period is blended into the next and skipped, to stretch,
//!    a blended copy of a period is inserted.
//! 2. Resample the time-scaled signal by `pitch` with linear interpolation,
//!    which restores the duration and moves the pitch.
//!
//! With both factors at 1.0 the stage is a byte-exact pass-through. In any
//! other setting output length differs from input length: callers must not
//! assume 1:1 buffer sizing, and must call [`PitchShiftStage::flush`] at end
//! of stream to drain what is still buffered.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut stage = PitchShiftStage::new(44100, 2);
//! stage.set_pitch_semitones(3.0);
//! let shifted = stage.process(&decoded);
//! sink.write(&shifted);
//! ```

mod buffer;
mod period;
mod session;

pub use period::{AMDF_FREQ, MAX_PITCH_HZ, MIN_PITCH_HZ};

use session::PitchShiftSession;

/// Allowed pitch multiplier range
pub const MIN_PITCH: f32 = 0.25;
pub const MAX_PITCH: f32 = 4.0;

/// Allowed speed (tempo) range
pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Convert semitones to a pitch multiplier
pub fn semitones_to_multiplier(semitones: f32) -> f32 {
    2f32.powf(semitones / 12.0)
}

/// Pitch/tempo shifter for interleaved 16-bit PCM
pub struct PitchShiftStage {
    sample_rate: u32,
    channels: usize,
    pitch: f32,
    speed: f32,
    session: PitchShiftSession,
}

impl PitchShiftStage {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = channels.clamp(1, 2) as usize;
        let sample_rate = sample_rate.max(1);
        Self {
            sample_rate,
            channels,
            pitch: 1.0,
            speed: 1.0,
            session: PitchShiftSession::new(sample_rate, channels, 1.0, 1.0),
        }
    }

    /// Start over for a new stream format
    pub fn configure(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate.max(1);
        self.channels = channels.clamp(1, 2) as usize;
        self.reset();
    }

    /// Set pitch multiplier (0.25 - 4.0)
    pub fn set_pitch(&mut self, multiplier: f32) {
        if !multiplier.is_finite() {
            return;
        }
        self.pitch = multiplier.clamp(MIN_PITCH, MAX_PITCH);
        self.session.set_pitch(self.pitch);
    }

    /// Set pitch in semitones
    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        if semitones.is_finite() {
            self.set_pitch(semitones_to_multiplier(semitones));
        }
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Pitch in semitones
    pub fn pitch_semitones(&self) -> f32 {
        12.0 * self.pitch.log2()
    }

    /// Set playback speed (0.5 - 2.0) without changing pitch
    pub fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() {
            return;
        }
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.session.set_speed(self.speed);
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// True when the stage leaves audio untouched
    pub fn is_passthrough(&self) -> bool {
        self.pitch == 1.0 && self.speed == 1.0
    }

    /// Feed interleaved samples, returning whatever output is ready
    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        self.session.write(samples);
        self.session.read()
    }

    /// Drain buffered input at end of stream
    pub fn flush(&mut self) -> Vec<i16> {
        self.session.flush();
        self.session.read()
    }

    /// Discard all buffered audio, replacing the session
    pub fn reset(&mut self) {
        self.session = PitchShiftSession::new(self.sample_rate, self.channels, self.speed, self.pitch);
    }

    /// Frames buffered but not yet emitted
    pub fn pending_frames(&self) -> usize {
        self.session.num_input_samples() + self.session.num_pitch_samples() + self.session.num_output_samples()
    }

    /// Capacity of the working buffers in samples
    pub fn buffer_capacity(&self) -> usize {
        self.session.buffer_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, frames: usize, channels: usize) -> Vec<i16> {
        (0..frames)
            .flat_map(|i| {
                let value = ((2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 10000.0) as i16;
                std::iter::repeat(value).take(channels)
            })
            .collect()
    }

    fn run(stage: &mut PitchShiftStage, input: &[i16], chunk: usize) -> Vec<i16> {
        let mut output = Vec::new();
        for block in input.chunks(chunk) {
            output.extend(stage.process(block));
        }
        output.extend(stage.flush());
        output
    }

    #[test]
    fn test_unity_is_byte_identical() {
        let mut stage = PitchShiftStage::new(44100, 2);
        let input = sine(440.0, 44100, 4096, 2);
        assert_eq!(stage.process(&input), input);
        assert!(stage.flush().is_empty());
    }

    #[test]
    fn test_pitch_shift_preserves_duration() {
        let mut stage = PitchShiftStage::new(44100, 1);
        stage.set_pitch(2.0);
        let input = sine(220.0, 44100, 88200, 1);
        let output = run(&mut stage, &input, 4096);
        let ratio = output.len() as f32 / input.len() as f32;
        assert!((ratio - 1.0).abs() < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn test_pitch_down_preserves_duration_stereo() {
        let mut stage = PitchShiftStage::new(48000, 2);
        stage.set_pitch_semitones(-5.0);
        let input = sine(300.0, 48000, 48000, 2);
        let output = run(&mut stage, &input, 2048);
        assert_eq!(output.len() % 2, 0);
        let ratio = output.len() as f32 / input.len() as f32;
        assert!((ratio - 1.0).abs() < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn test_speed_scales_length() {
        let mut stage = PitchShiftStage::new(44100, 1);
        stage.set_speed(2.0);
        let input = sine(440.0, 44100, 88200, 1);
        let output = run(&mut stage, &input, 4096);
        let ratio = output.len() as f32 / input.len() as f32;
        assert!((ratio - 0.5).abs() < 0.03, "ratio {}", ratio);

        let mut slow = PitchShiftStage::new(44100, 1);
        slow.set_speed(0.5);
        let output = run(&mut slow, &input, 4096);
        let ratio = output.len() as f32 / input.len() as f32;
        assert!((ratio - 2.0).abs() < 0.1, "ratio {}", ratio);
    }

    #[test]
    fn test_buffer_after_pitch_up_is_shorter() {
        let mut stage = PitchShiftStage::new(44100, 2);
        let block = sine(440.0, 44100, 4096, 2);
        let unshifted = stage.process(&block).len();
        stage.set_pitch_semitones(12.0);
        let shifted = stage.process(&block).len();
        assert!(shifted < unshifted, "{} vs {}", shifted, unshifted);
    }

    #[test]
    fn test_parameter_clamping() {
        let mut stage = PitchShiftStage::new(44100, 2);
        stage.set_pitch(10.0);
        assert_eq!(stage.pitch(), MAX_PITCH);
        stage.set_pitch(0.0);
        assert_eq!(stage.pitch(), MIN_PITCH);
        stage.set_speed(5.0);
        assert_eq!(stage.speed(), MAX_SPEED);
        stage.set_pitch_semitones(12.0);
        assert!((stage.pitch() - 2.0).abs() < 1e-5);
        assert!((stage.pitch_semitones() - 12.0).abs() < 1e-3);
    }

    #[test]
    fn test_reset_discards_pending_audio() {
        let mut stage = PitchShiftStage::new(44100, 1);
        stage.set_pitch(1.5);
        stage.process(&sine(440.0, 44100, 1000, 1));
        assert!(stage.pending_frames() > 0);
        stage.reset();
        assert_eq!(stage.pending_frames(), 0);
        assert_eq!(stage.pitch(), 1.5);
    }

    #[test]
    fn test_buffers_do_not_shrink() {
        let mut stage = PitchShiftStage::new(44100, 2);
        stage.set_pitch(0.5);
        stage.process(&sine(440.0, 44100, 16384, 2));
        let grown = stage.buffer_capacity();
        stage.process(&sine(440.0, 44100, 64, 2));
        assert!(stage.buffer_capacity() >= grown);
    }
}
