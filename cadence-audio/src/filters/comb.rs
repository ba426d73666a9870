//! Feedback comb filter

/// Feedback comb: `y = buf[i]; buf[i] = x + y·feedback`
#[derive(Debug, Clone)]
pub struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
}

impl CombFilter {
    pub fn new(delay_samples: usize, feedback: f32) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            index: 0,
            feedback,
        }
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback;
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.buffer[self.index] = input + output * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    pub fn delay(&self) -> usize {
        self.buffer.len()
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
    fn test_echo_spacing_and_decay() {
        let mut comb = CombFilter::new(4, 0.5);
        let output: Vec<f32> = (0..13)
            .map(|i| comb.process(if i == 0 { 1.0 } else { 0.0 }))
            .collect();
        assert_eq!(output[4], 1.0);
        assert_eq!(output[8], 0.5);
        assert_eq!(output[12], 0.25);
        assert_eq!(output[5], 0.0);
    }

    #[test]
    fn test_reset() {
        let mut comb = CombFilter::new(3, 0.9);
        comb.process(1.0);
        comb.reset();
        assert!((0..10).all(|_| comb.process(0.0) == 0.0));
    }
}
