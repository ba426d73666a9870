//! WSOLA stream state: time-scale by pitch periods, then resample

use super::buffer::GrowBuffer;
use super::period::PeriodDetector;

/// Scaled sample rates are kept below this for the integer resampler
const RATE_LIMIT: i64 = 1 << 14;

/// Cross-fade `count` frames from `ramp_down` into `ramp_up`, writing to `out`
fn overlap_add(count: usize, channels: usize, out: &mut [i16], ramp_down: &[i16], ramp_up: &[i16]) {
    let n = count as i64;
    for channel in 0..channels {
        for t in 0..count {
            let i = t * channels + channel;
            let t = t as i64;
            out[i] = ((ramp_down[i] as i64 * (n - t) + ramp_up[i] as i64 * t) / n) as i16;
        }
    }
}

/// Working state of one continuous pitch/tempo-shifted stream
///
/// Replaced wholesale on seek; nothing carries over between sessions.
pub(crate) struct PitchShiftSession {
    channels: usize,
    sample_rate: u32,
    input: GrowBuffer,
    output: GrowBuffer,
    pitch_buffer: GrowBuffer,
    detector: PeriodDetector,
    speed: f32,
    pitch: f32,
    remaining_input_to_copy: usize,
    old_rate_position: i64,
    new_rate_position: i64,
}

impl PitchShiftSession {
    pub fn new(sample_rate: u32, channels: usize, speed: f32, pitch: f32) -> Self {
        let detector = PeriodDetector::new(sample_rate, channels);
        let max_required = detector.max_required();
        Self {
            channels,
            sample_rate,
            input: GrowBuffer::new(channels, max_required),
            output: GrowBuffer::new(channels, max_required),
            pitch_buffer: GrowBuffer::new(channels, max_required),
            detector,
            speed,
            pitch,
            remaining_input_to_copy: 0,
            old_rate_position: 0,
            new_rate_position: 0,
        }
    }

    pub fn set_speed(&mut self, speed: f32) {
        if speed != self.speed {
            self.speed = speed;
            self.reset_rate_positions();
        }
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        if pitch != self.pitch {
            self.pitch = pitch;
            self.reset_rate_positions();
        }
    }

    fn reset_rate_positions(&mut self) {
        self.old_rate_position = 0;
        self.new_rate_position = 0;
    }

    pub fn num_input_samples(&self) -> usize {
        self.input.frames()
    }

    pub fn num_output_samples(&self) -> usize {
        self.output.frames()
    }

    pub fn num_pitch_samples(&self) -> usize {
        self.pitch_buffer.frames()
    }

    /// Combined capacity of the three working buffers in samples
    pub fn buffer_capacity(&self) -> usize {
        self.input.capacity() + self.output.capacity() + self.pitch_buffer.capacity()
    }

    /// True when input goes straight to output untouched
    fn is_passthrough(&self) -> bool {
        self.speed == 1.0 && self.pitch == 1.0
    }

    /// Queue interleaved input and process as much as possible
    pub fn write(&mut self, samples: &[i16]) {
        self.input.extend_from_slice(samples);
        self.process_input();
    }

    /// Take all finished output
    pub fn read(&mut self) -> Vec<i16> {
        self.output.take_all()
    }

    /// Process whatever input is buffered, padding with silence, and trim the
    /// output to the length the buffered input should have produced
    pub fn flush(&mut self) {
        let remaining = self.input.frames();
        let scale = (self.speed / self.pitch) as f64;
        let rate = self.pitch as f64;
        let expected = self.output.frames()
            + ((remaining as f64 / scale + self.pitch_buffer.frames() as f64) / rate + 0.5) as usize;

        self.input.push_silence(2 * self.detector.max_required());
        self.process_input();

        if self.output.frames() > expected {
            self.output.truncate_frames(expected);
        }

        self.input.clear();
        self.pitch_buffer.clear();
        self.remaining_input_to_copy = 0;
    }

    fn process_input(&mut self) {
        if self.is_passthrough() {
            self.input.move_tail_to(0, &mut self.output);
            return;
        }

        let original_output = self.output.frames();
        let scale = self.speed / self.pitch;
        let rate = self.pitch;

        if !(0.99999..=1.00001).contains(&scale) {
            self.change_speed(scale);
        } else {
            self.input.move_tail_to(0, &mut self.output);
        }

        if rate != 1.0 {
            self.adjust_rate(rate, original_output);
        }
    }

    /// Time-scale the buffered input by `scale` without changing pitch
    fn change_speed(&mut self, scale: f32) {
        let max_required = self.detector.max_required();
        let available = self.input.frames();
        if available < max_required {
            return;
        }

        let mut position = 0usize;
        loop {
            if self.remaining_input_to_copy > 0 {
                position += self.copy_input_to_output(position);
            } else {
                let samples = self.input.from_frame(position);
                let period = self.detector.find_period(samples, true);
                if scale > 1.0 {
                    let skipped = self.skip_pitch_period(position, scale, period);
                    position += period + skipped;
                } else {
                    position += self.insert_pitch_period(position, scale, period);
                }
            }

            if position + max_required > available {
                break;
            }
        }

        self.input.remove_front(position);
    }

    fn copy_input_to_output(&mut self, position: usize) -> usize {
        let count = self.detector.max_required().min(self.remaining_input_to_copy);
        let start = position * self.channels;
        let end = start + count * self.channels;
        self.output.extend_from_slice(&self.input.as_slice()[start..end]);
        self.remaining_input_to_copy -= count;
        count
    }

    /// Drop one period by blending it into the next
    fn skip_pitch_period(&mut self, position: usize, scale: f32, period: usize) -> usize {
        let new_samples = if scale >= 2.0 {
            (period as f32 / (scale - 1.0)) as usize
        } else {
            self.remaining_input_to_copy = (period as f32 * (2.0 - scale) / (scale - 1.0)) as usize;
            period
        };

        let channels = self.channels;
        let samples = self.input.from_frame(position);
        let out = self.output.append_frames(new_samples);
        overlap_add(new_samples, channels, out, samples, &samples[period * channels..]);
        new_samples
    }

    /// Repeat part of one period, cross-fading the original into the shifted copy
    fn insert_pitch_period(&mut self, position: usize, scale: f32, period: usize) -> usize {
        let new_samples = if scale < 0.5 {
            (period as f32 * scale / (1.0 - scale)) as usize
        } else {
            self.remaining_input_to_copy =
                (period as f32 * (2.0 * scale - 1.0) / (1.0 - scale)) as usize;
            period
        };

        let channels = self.channels;
        let samples = self.input.from_frame(position);
        self.output.extend_from_slice(&samples[..period * channels]);
        let out = self.output.append_frames(new_samples);
        overlap_add(new_samples, channels, out, &samples[period * channels..], samples);
        new_samples
    }

    /// Resample output produced since `original_output` by linear interpolation
    fn adjust_rate(&mut self, rate: f32, original_output: usize) {
        let mut new_rate = (self.sample_rate as f32 / rate) as i64;
        let mut old_rate = self.sample_rate as i64;
        while new_rate > RATE_LIMIT || old_rate > RATE_LIMIT {
            new_rate >>= 1;
            old_rate >>= 1;
        }

        if self.output.frames() == original_output {
            return;
        }
        self.output.move_tail_to(original_output, &mut self.pitch_buffer);

        let channels = self.channels;
        let pitch_frames = self.pitch_buffer.frames();
        let mut position = 0usize;
        while position + 1 < pitch_frames {
            while (self.old_rate_position + 1) * new_rate > self.new_rate_position * old_rate {
                let frame = &self.pitch_buffer.as_slice()[position * channels..];
                for channel in 0..channels {
                    let left = frame[channel] as i64;
                    let right = frame[channel + channels] as i64;
                    let value = self.interpolate(left, right, old_rate, new_rate);
                    self.output.push(value);
                }
                self.new_rate_position += 1;
            }

            self.old_rate_position += 1;
            if self.old_rate_position == old_rate {
                self.old_rate_position = 0;
                self.new_rate_position = 0;
            }
            position += 1;
        }

        self.pitch_buffer.remove_front(position);
    }

    #[inline]
    fn interpolate(&self, left: i64, right: i64, old_rate: i64, new_rate: i64) -> i16 {
        let position = self.new_rate_position * old_rate;
        let left_position = self.old_rate_position * new_rate;
        let right_position = (self.old_rate_position + 1) * new_rate;
        let ratio = right_position - position;
        let width = right_position - left_position;
        ((ratio * left + (width - ratio) * right) / width) as i16
    }
}
