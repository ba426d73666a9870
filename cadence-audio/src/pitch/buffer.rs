//! Interleaved sample buffer with geometric growth

/// Interleaved i16 buffer addressed in frames
///
/// Capacity doubles when more room is needed and is never released while the
/// buffer lives, so steady-state processing does not allocate.
#[derive(Debug, Clone)]
pub(crate) struct GrowBuffer {
    data: Vec<i16>,
    channels: usize,
}

impl GrowBuffer {
    pub fn new(channels: usize, initial_frames: usize) -> Self {
        Self {
            data: Vec::with_capacity(initial_frames * channels),
            channels,
        }
    }

    /// Number of frames held
    #[inline]
    pub fn frames(&self) -> usize {
        self.data.len() / self.channels
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Make room for `frames` more frames, at least doubling when growing
    pub fn reserve_frames(&mut self, frames: usize) {
        let needed = self.data.len() + frames * self.channels;
        let capacity = self.data.capacity();
        if needed > capacity {
            let target = needed.max(capacity * 2);
            self.data.reserve_exact(target - self.data.len());
        }
    }

    pub fn extend_from_slice(&mut self, samples: &[i16]) {
        self.reserve_frames(samples.len().div_ceil(self.channels));
        self.data.extend_from_slice(samples);
    }

    /// Append silent frames
    pub fn push_silence(&mut self, frames: usize) {
        self.reserve_frames(frames);
        self.data.resize(self.data.len() + frames * self.channels, 0);
    }

    /// Append `frames` silent frames and return them for writing
    pub fn append_frames(&mut self, frames: usize) -> &mut [i16] {
        let start = self.data.len();
        self.push_silence(frames);
        &mut self.data[start..]
    }

    #[inline]
    pub fn push(&mut self, sample: i16) {
        if self.data.len() == self.data.capacity() {
            self.reserve_frames(1);
        }
        self.data.push(sample);
    }

    /// Drop the oldest `frames` frames
    pub fn remove_front(&mut self, frames: usize) {
        let samples = (frames * self.channels).min(self.data.len());
        self.data.drain(..samples);
    }

    pub fn truncate_frames(&mut self, frames: usize) {
        self.data.truncate(frames * self.channels);
    }

    /// Move everything from frame `start` on into `dest`
    pub fn move_tail_to(&mut self, start: usize, dest: &mut GrowBuffer) {
        let from = (start * self.channels).min(self.data.len());
        dest.extend_from_slice(&self.data[from..]);
        self.data.truncate(from);
    }

    /// Take all samples out, leaving capacity in place
    pub fn take_all(&mut self) -> Vec<i16> {
        self.data.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    #[inline]
    pub fn as_slice(&self) -> &[i16] {
        &self.data
    }

    /// Samples starting at `frame`
    #[inline]
    pub fn from_frame(&self, frame: usize) -> &[i16] {
        &self.data[frame * self.channels..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_doubles_and_never_shrinks() {
        let mut buffer = GrowBuffer::new(2, 4);
        assert!(buffer.capacity() >= 8);
        buffer.extend_from_slice(&[1; 10]);
        assert!(buffer.capacity() >= 16);
        let grown = buffer.capacity();
        buffer.remove_front(5);
        assert_eq!(buffer.frames(), 0);
        assert_eq!(buffer.capacity(), grown);
    }

    #[test]
    fn test_move_tail() {
        let mut source = GrowBuffer::new(1, 8);
        source.extend_from_slice(&[1, 2, 3, 4, 5]);
        let mut dest = GrowBuffer::new(1, 8);
        source.move_tail_to(3, &mut dest);
        assert_eq!(source.as_slice(), &[1, 2, 3]);
        assert_eq!(dest.as_slice(), &[4, 5]);
    }
}
