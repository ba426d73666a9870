//! cpal output stream fed through a lock-free ring buffer

use super::{map_channels, AudioSink, DeviceEvent};
use crate::error::DeviceError;
use crate::pcm::{i16_to_f32, StreamFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{unbounded, Receiver, Sender};
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split};
use ringbuf::{HeapProd, HeapRb};
use rubato::{FftFixedInOut, Resampler};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ring buffer length in milliseconds of output audio
const RING_MS: usize = 200;

/// Resampler chunk size in frames
const RESAMPLE_CHUNK: usize = 1024;

/// Sleep between attempts while waiting for ring space
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// State shared with the real-time callback
struct CallbackShared {
    volume_bits: AtomicU32,
    paused: AtomicBool,
    flush_requested: AtomicBool,
    /// Set by the error callback once the device is gone for good
    lost: AtomicBool,
}

/// Streaming sample-rate converter for the source → device rate change
struct StreamResampler {
    resampler: FftFixedInOut<f32>,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk
    staging: Vec<Vec<f32>>,
}

impl StreamResampler {
    fn new(from: u32, to: u32, channels: usize) -> Result<Self, DeviceError> {
        let resampler = FftFixedInOut::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, channels)
            .map_err(|e| DeviceError::BuildStream(e.to_string()))?;
        Ok(Self {
            resampler,
            channels,
            staging: vec![Vec::new(); channels],
        })
    }

    /// Queue interleaved input and append every completed chunk to `out`
    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for frame in input.chunks_exact(self.channels) {
            for (channel, &sample) in self.staging.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        loop {
            let needed = self.resampler.input_frames_next();
            if self.staging[0].len() < needed {
                break;
            }
            let chunk: Vec<&[f32]> = self.staging.iter().map(|c| &c[..needed]).collect();
            match self.resampler.process(&chunk, None) {
                Ok(resampled) => {
                    let frames = resampled[0].len();
                    for i in 0..frames {
                        for channel in &resampled {
                            out.push(channel[i]);
                        }
                    }
                }
                Err(e) => warn!("Resampling failed, dropping chunk: {}", e),
            }
            for channel in self.staging.iter_mut() {
                channel.drain(..needed);
            }
        }
    }

    /// Pad the staged remainder to a full chunk and push it through
    fn finish(&mut self, out: &mut Vec<f32>) {
        let staged = self.staging[0].len();
        if staged == 0 {
            return;
        }
        let needed = self.resampler.input_frames_next();
        let expected_out = staged * self.resampler.output_frames_next() / needed;
        for channel in self.staging.iter_mut() {
            channel.resize(needed, 0.0);
        }
        let start = out.len();
        self.process(&[], out);
        out.truncate(start + expected_out * self.channels);
    }

    fn clear(&mut self) {
        for channel in self.staging.iter_mut() {
            channel.clear();
        }
        self.resampler.reset();
    }
}

/// Default-device output sink
pub struct CpalSink {
    stream: cpal::Stream,
    producer: HeapProd<f32>,
    shared: Arc<CallbackShared>,
    events: Receiver<DeviceEvent>,
    format: StreamFormat,
    device_channels: usize,
    resampler: Option<StreamResampler>,
    /// Converted output not yet in the ring
    pending: Vec<f32>,
    scratch: Vec<f32>,
}

impl CpalSink {
    /// Open the default output device for `format`
    ///
    /// Uses the source rate when the device supports it and resamples
    /// otherwise. The stream starts paused.
    pub fn open(format: StreamFormat) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

        let default_config = device
            .default_output_config()
            .map_err(|e| DeviceError::BuildStream(e.to_string()))?;
        let device_channels = default_config.channels();

        let supports_source_rate = device
            .supported_output_configs()
            .map(|mut configs| {
                configs.any(|range| {
                    range.channels() == device_channels
                        && range.min_sample_rate().0 <= format.sample_rate
                        && range.max_sample_rate().0 >= format.sample_rate
                })
            })
            .unwrap_or(false);

        let device_rate = if supports_source_rate {
            format.sample_rate
        } else {
            default_config.sample_rate().0
        };

        let config = cpal::StreamConfig {
            channels: device_channels,
            sample_rate: cpal::SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_len = device_rate as usize * device_channels as usize * RING_MS / 1000;
        let (producer, mut consumer) = HeapRb::<f32>::new(ring_len).split();

        let shared = Arc::new(CallbackShared {
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            paused: AtomicBool::new(true),
            flush_requested: AtomicBool::new(false),
            lost: AtomicBool::new(false),
        });
        let (event_tx, events): (Sender<DeviceEvent>, Receiver<DeviceEvent>) = unbounded();

        let callback_shared = shared.clone();
        let error_shared = shared.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if callback_shared.flush_requested.swap(false, Ordering::AcqRel) {
                        consumer.clear();
                    }
                    if callback_shared.paused.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    let volume = f32::from_bits(callback_shared.volume_bits.load(Ordering::Relaxed));
                    for sample in data.iter_mut() {
                        // Underrun plays silence
                        *sample = consumer.try_pop().unwrap_or(0.0) * volume;
                    }
                },
                move |err| {
                    let event = match err {
                        cpal::StreamError::DeviceNotAvailable => {
                            error_shared.lost.store(true, Ordering::Release);
                            DeviceEvent::PermanentLoss
                        }
                        cpal::StreamError::BackendSpecific { .. } => DeviceEvent::TransientLoss,
                    };
                    let _ = event_tx.send(event);
                },
                None,
            )
            .map_err(|e| DeviceError::BuildStream(e.to_string()))?;

        let resampler = if device_rate != format.sample_rate {
            info!("Resampling {}Hz -> {}Hz for output", format.sample_rate, device_rate);
            Some(StreamResampler::new(
                format.sample_rate,
                device_rate,
                format.channels as usize,
            )?)
        } else {
            None
        };

        debug!(
            "Output stream: {}Hz, {} channels, ring {} samples",
            device_rate, device_channels, ring_len
        );

        Ok(Self {
            stream,
            producer,
            shared,
            events,
            format,
            device_channels: device_channels as usize,
            resampler,
            pending: Vec::with_capacity(ring_len),
            scratch: Vec::new(),
        })
    }

    /// Convert a block into device samples appended to `pending`
    fn convert(&mut self, samples: &[i16]) {
        let source_channels = self.format.channels as usize;
        self.scratch.clear();
        self.scratch.extend(samples.iter().map(|&s| i16_to_f32(s)));

        match self.resampler.as_mut() {
            Some(resampler) => {
                let mut resampled = Vec::new();
                resampler.process(&self.scratch, &mut resampled);
                map_channels(&resampled, source_channels, self.device_channels, &mut self.pending);
            }
            None => map_channels(&self.scratch, source_channels, self.device_channels, &mut self.pending),
        }
    }

    /// Move as much pending audio into the ring as fits, until `deadline`
    fn push_pending(&mut self, deadline: Instant) -> bool {
        loop {
            let pushed = self.producer.push_slice(&self.pending);
            self.pending.drain(..pushed);
            if self.pending.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl AudioSink for CpalSink {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn write(&mut self, samples: &[i16], timeout: Duration) -> Result<usize, DeviceError> {
        if self.shared.lost.load(Ordering::Acquire) {
            return Err(DeviceError::Lost { transient: false });
        }
        let deadline = Instant::now() + timeout;

        // Backlog from an earlier write must go first
        if !self.pending.is_empty() && !self.push_pending(deadline) {
            return Ok(0);
        }

        self.convert(samples);
        self.push_pending(deadline);
        Ok(samples.len())
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.shared.paused.store(true, Ordering::Relaxed);
        self.stream
            .pause()
            .map_err(|e| DeviceError::PlayStream(e.to_string()))
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.shared.paused.store(false, Ordering::Relaxed);
        self.stream
            .play()
            .map_err(|e| DeviceError::PlayStream(e.to_string()))
    }

    fn flush(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.clear();
        }
        self.shared.flush_requested.store(true, Ordering::Release);
    }

    fn drain(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if let Some(resampler) = self.resampler.as_mut() {
            let mut tail = Vec::new();
            resampler.finish(&mut tail);
            map_channels(&tail, self.format.channels as usize, self.device_channels, &mut self.pending);
        }
        if !self.push_pending(deadline) {
            return false;
        }
        while self.producer.occupied_len() > 0 {
            if Instant::now() >= deadline || self.shared.paused.load(Ordering::Relaxed) {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        true
    }

    fn poll_event(&mut self) -> Option<DeviceEvent> {
        self.events.try_recv().ok()
    }
}
