//! Schroeder allpass filter

/// Allpass: `y = -g·x + buf[i]; buf[i] = x + g·y`
///
/// Unit magnitude at every frequency; only the phase is smeared.
#[derive(Debug, Clone)]
pub struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
    coefficient: f32,
}

impl AllpassFilter {
    pub fn new(delay_samples: usize, coefficient: f32) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            index: 0,
            coefficient,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        let output = -self.coefficient * input + buffered;
        self.buffer[self.index] = input + self.coefficient * output;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_energy_is_preserved() {
        let mut allpass = AllpassFilter::new(37, 0.5);
        let energy: f64 = (0..20000)
            .map(|i| {
                let y = allpass.process(if i == 0 { 1.0 } else { 0.0 }) as f64;
                y * y
            })
            .sum();
        assert!((energy - 1.0).abs() < 1e-4, "energy {}", energy);
    }

    #[test]
    fn test_first_output_is_scaled_input() {
        let mut allpass = AllpassFilter::new(5, 0.5);
        assert_eq!(allpass.process(1.0), -0.5);
    }
}
