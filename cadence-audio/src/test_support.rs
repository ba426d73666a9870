//! In-memory backend for engine tests: sine decoders and paced capture sinks

use crate::backend::Backend;
use crate::error::{DecodeError, DeviceError, SourceError};
use crate::pcm::{PcmFrame, StreamFormat};
use crate::sink::{AudioSink, DeviceEvent};
use crate::source::SourceDecoder;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BLOCK_FRAMES: u64 = 256;

/// Decoder producing a fixed-length sine tone
pub struct SineDecoder {
    format: StreamFormat,
    total_frames: u64,
    position: u64,
}

impl SineDecoder {
    pub fn new(sample_rate: u32, channels: u16, duration_ms: u64) -> Self {
        Self {
            format: StreamFormat {
                sample_rate,
                channels,
                duration_ms: Some(duration_ms),
            },
            total_frames: sample_rate as u64 * duration_ms / 1000,
            position: 0,
        }
    }
}

impl SourceDecoder for SineDecoder {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<PcmFrame>, DecodeError> {
        if self.position >= self.total_frames {
            return Ok(None);
        }
        let frames = BLOCK_FRAMES.min(self.total_frames - self.position);
        let channels = self.format.channels as usize;
        let mut samples = Vec::with_capacity(frames as usize * channels);
        for i in self.position..self.position + frames {
            let phase = i as f32 * 440.0 * std::f32::consts::TAU / self.format.sample_rate as f32;
            let value = (phase.sin() * 8000.0) as i16;
            samples.extend(std::iter::repeat(value).take(channels));
        }
        let pts_ms = self.position * 1000 / self.format.sample_rate as u64;
        self.position += frames;
        Ok(Some(PcmFrame {
            samples,
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            pts_ms,
        }))
    }

    fn seek(&mut self, position_ms: u64) -> Result<u64, DecodeError> {
        self.position = (self.format.sample_rate as u64 * position_ms / 1000).min(self.total_frames);
        Ok(self.position * 1000 / self.format.sample_rate as u64)
    }
}

/// Sine decoder whose stream breaks after `fail_after_ms` and cannot seek
pub struct FailingDecoder {
    inner: SineDecoder,
    fail_after_frames: u64,
}

impl FailingDecoder {
    pub fn new(sample_rate: u32, channels: u16, duration_ms: u64, fail_after_ms: u64) -> Self {
        Self {
            inner: SineDecoder::new(sample_rate, channels, duration_ms),
            fail_after_frames: sample_rate as u64 * fail_after_ms / 1000,
        }
    }
}

impl SourceDecoder for FailingDecoder {
    fn format(&self) -> StreamFormat {
        self.inner.format()
    }

    fn next_frame(&mut self) -> Result<Option<PcmFrame>, DecodeError> {
        if self.inner.position >= self.fail_after_frames {
            return Err(DecodeError::Fatal("corrupt frame header".into()));
        }
        self.inner.next_frame()
    }

    fn seek(&mut self, _position_ms: u64) -> Result<u64, DecodeError> {
        Err(DecodeError::Seek("stream is not seekable".into()))
    }
}

/// Observable state of one capture sink
#[derive(Debug, Default)]
pub struct CaptureState {
    pub samples_written: usize,
    pub flushes: usize,
    pub volume: f32,
    pub paused: bool,
    pub events: VecDeque<DeviceEvent>,
    /// Error returned by every write while set
    pub write_error: Option<fn() -> DeviceError>,
}

/// Sink that consumes audio at real-time pace without a device
pub struct CaptureSink {
    format: StreamFormat,
    state: Arc<Mutex<CaptureState>>,
    /// Samples the simulated device may hold ahead of playback
    capacity: usize,
    queued: usize,
    /// Start of the current unpaused run
    clock: Option<Instant>,
    played_in_run: usize,
}

impl CaptureSink {
    fn new(format: StreamFormat, state: Arc<Mutex<CaptureState>>) -> Self {
        Self {
            format,
            state,
            capacity: format.samples_for(Duration::from_millis(100)),
            queued: 0,
            clock: None,
            played_in_run: 0,
        }
    }

    /// Let simulated playback consume queued samples
    fn advance(&mut self) {
        if let Some(clock) = self.clock {
            let played = self.format.samples_for(clock.elapsed());
            self.queued = self.queued.saturating_sub(played - self.played_in_run);
            self.played_in_run = played;
        }
    }
}

impl AudioSink for CaptureSink {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn write(&mut self, samples: &[i16], timeout: Duration) -> Result<usize, DeviceError> {
        if let Some(error) = self.state.lock().write_error {
            return Err(error());
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.advance();
            if self.queued + samples.len() <= self.capacity.max(samples.len()) {
                self.queued += samples.len();
                self.state.lock().samples_written += samples.len();
                return Ok(samples.len());
            }
            if Instant::now() >= deadline {
                return Ok(0);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().volume = volume;
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.advance();
        self.clock = None;
        self.played_in_run = 0;
        self.state.lock().paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.clock.get_or_insert_with(Instant::now);
        self.state.lock().paused = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.queued = 0;
        self.state.lock().flushes += 1;
    }

    fn drain(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.advance();
            if self.queued == 0 {
                return true;
            }
            if self.clock.is_none() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn poll_event(&mut self) -> Option<DeviceEvent> {
        self.state.lock().events.pop_front()
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackSpec {
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    fail_after_ms: Option<u64>,
}

/// Backend serving registered sine tracks and recording every sink it opens
#[derive(Default)]
pub struct TestBackend {
    tracks: Mutex<HashMap<PathBuf, TrackSpec>>,
    sinks: Mutex<Vec<Arc<Mutex<CaptureState>>>>,
}

impl TestBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_track(&self, path: &str, sample_rate: u32, channels: u16, duration_ms: u64) -> PathBuf {
        self.insert_track(path, sample_rate, channels, duration_ms, None)
    }

    /// Register a track whose decoder fails fatally `fail_after_ms` in
    pub fn add_failing_track(
        &self,
        path: &str,
        sample_rate: u32,
        channels: u16,
        duration_ms: u64,
        fail_after_ms: u64,
    ) -> PathBuf {
        self.insert_track(path, sample_rate, channels, duration_ms, Some(fail_after_ms))
    }

    fn insert_track(
        &self,
        path: &str,
        sample_rate: u32,
        channels: u16,
        duration_ms: u64,
        fail_after_ms: Option<u64>,
    ) -> PathBuf {
        let path = PathBuf::from(path);
        self.tracks.lock().insert(
            path.clone(),
            TrackSpec {
                sample_rate,
                channels,
                duration_ms,
                fail_after_ms,
            },
        );
        path
    }

    pub fn sinks(&self) -> Vec<Arc<Mutex<CaptureState>>> {
        self.sinks.lock().clone()
    }

    /// Inject a device event into the most recently opened sink
    pub fn send_device_event(&self, event: DeviceEvent) {
        if let Some(sink) = self.sinks.lock().last() {
            sink.lock().events.push_back(event);
        }
    }
}

impl Backend for TestBackend {
    fn open_decoder(&self, path: &Path) -> Result<Box<dyn SourceDecoder>, SourceError> {
        let spec = *self
            .tracks
            .lock()
            .get(path)
            .ok_or_else(|| SourceError::NotFound(path.to_path_buf()))?;
        let decoder: Box<dyn SourceDecoder> = match spec.fail_after_ms {
            Some(fail_after_ms) => Box::new(FailingDecoder::new(
                spec.sample_rate,
                spec.channels,
                spec.duration_ms,
                fail_after_ms,
            )),
            None => Box::new(SineDecoder::new(spec.sample_rate, spec.channels, spec.duration_ms)),
        };
        Ok(decoder)
    }

    fn open_sink(&self, format: StreamFormat) -> Result<Box<dyn AudioSink>, DeviceError> {
        let state = Arc::new(Mutex::new(CaptureState {
            volume: 1.0,
            paused: true,
            ..CaptureState::default()
        }));
        self.sinks.lock().push(state.clone());
        Ok(Box::new(CaptureSink::new(format, state)))
    }
}
