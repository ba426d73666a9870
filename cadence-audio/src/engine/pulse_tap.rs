//! Analysis tap on processed output and its publisher thread

use super::settings::SettingsCell;
use super::EngineEvent;
use crate::pcm::StreamFormat;
use cadence_analysis::{BeatSettings, PulseConfig, SpectralPulseAnalyzer};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Publisher wake-up period (~60/s)
const PUBLISH_INTERVAL: Duration = Duration::from_millis(16);

/// Samples kept when the publisher falls behind (half a second of stereo 48k)
const TAP_CAPACITY: usize = 48_000;

struct TapRing {
    samples: VecDeque<i16>,
    format: StreamFormat,
    generation: u64,
}

/// Mutex-guarded ring between pipeline threads and the publisher
pub struct PulseTap {
    ring: Mutex<TapRing>,
    enabled: AtomicBool,
    /// Latest tempo estimate as f32 bits, 0 when unknown
    bpm_bits: AtomicU32,
}

impl PulseTap {
    pub fn new(enabled: bool) -> Self {
        Self {
            ring: Mutex::new(TapRing {
                samples: VecDeque::with_capacity(TAP_CAPACITY),
                format: StreamFormat::new(44100, 2),
                generation: 0,
            }),
            enabled: AtomicBool::new(enabled),
            bpm_bits: AtomicU32::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.ring.lock().samples.clear();
        }
    }

    /// Copy processed samples into the ring, dropping the oldest on overflow
    pub fn push(&self, samples: &[i16]) {
        if !self.is_enabled() {
            return;
        }
        let mut ring = self.ring.lock();
        ring.samples.extend(samples.iter().copied());
        let excess = ring.samples.len().saturating_sub(TAP_CAPACITY);
        if excess > 0 {
            ring.samples.drain(..excess);
        }
    }

    /// Switch to a new stream format, discarding queued samples
    pub fn set_format(&self, format: StreamFormat) {
        let mut ring = self.ring.lock();
        ring.samples.clear();
        ring.format = format;
        ring.generation += 1;
        self.bpm_bits.store(0, Ordering::Relaxed);
    }

    /// Move everything queued into `out`
    fn take(&self, out: &mut Vec<i16>) -> (StreamFormat, u64) {
        let mut ring = self.ring.lock();
        out.extend(ring.samples.drain(..));
        (ring.format, ring.generation)
    }

    /// Most recent tempo estimate of the playing track
    pub fn bpm(&self) -> Option<f32> {
        let bpm = f32::from_bits(self.bpm_bits.load(Ordering::Relaxed));
        (bpm > 0.0).then_some(bpm)
    }
}

fn pulse_config(settings: &SettingsCell) -> PulseConfig {
    settings.read(|c| PulseConfig {
        beat: BeatSettings {
            sensitivity: c.beat_sensitivity,
            cooldown_ms: c.beat_cooldown_ms,
            ..BeatSettings::default()
        },
        ..PulseConfig::default()
    })
}

/// Thread that analyzes tapped audio and publishes `Pulse` events
pub struct PulsePublisher {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PulsePublisher {
    pub fn spawn(tap: Arc<PulseTap>, settings: Arc<SettingsCell>, events: Sender<EngineEvent>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let thread = thread::Builder::new()
            .name("cadence-pulse".into())
            .spawn(move || {
                let mut analyzer = SpectralPulseAnalyzer::with_config(44100, 2, pulse_config(&settings));
                let mut generation = 0;
                let mut settings_version = settings.version();
                let mut buffer = Vec::new();

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(PUBLISH_INTERVAL);
                    if !tap.is_enabled() {
                        continue;
                    }

                    if settings.version() != settings_version {
                        settings_version = settings.version();
                        analyzer.set_config(pulse_config(&settings));
                    }

                    buffer.clear();
                    let (format, current) = tap.take(&mut buffer);
                    if current != generation {
                        generation = current;
                        analyzer.configure(format.sample_rate, format.channels);
                        debug!("Pulse analyzer reconfigured for {}Hz", format.sample_rate);
                    }
                    if buffer.is_empty() {
                        continue;
                    }

                    if analyzer.process_samples(&buffer) {
                        let snapshot = analyzer.snapshot();
                        tap.bpm_bits
                            .store(analyzer.bpm().unwrap_or(0.0).to_bits(), Ordering::Relaxed);
                        let _ = events.try_send(EngineEvent::Pulse(Box::new(snapshot)));
                    }
                }
            })
            .ok();

        Self { running, thread }
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PulsePublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_bounded() {
        let tap = PulseTap::new(true);
        tap.push(&vec![1; TAP_CAPACITY + 100]);
        let mut out = Vec::new();
        tap.take(&mut out);
        assert_eq!(out.len(), TAP_CAPACITY);
    }

    #[test]
    fn test_disabled_tap_drops_samples() {
        let tap = PulseTap::new(false);
        tap.push(&[1, 2, 3]);
        let mut out = Vec::new();
        tap.take(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_format_change_bumps_generation() {
        let tap = PulseTap::new(true);
        tap.push(&[5; 10]);
        tap.set_format(StreamFormat::new(48000, 1));
        let mut out = Vec::new();
        let (format, generation) = tap.take(&mut out);
        assert!(out.is_empty());
        assert_eq!(format.sample_rate, 48000);
        assert_eq!(generation, 1);
    }

    #[test]
    fn test_publisher_emits_pulses() {
        let tap = Arc::new(PulseTap::new(true));
        let settings = Arc::new(SettingsCell::new(Default::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut publisher = PulsePublisher::spawn(tap.clone(), settings, tx);

        tap.set_format(StreamFormat::new(44100, 1));
        let tone: Vec<i16> = (0..8192).map(|i| ((i as f32 * 0.02).sin() * 12000.0) as i16).collect();
        tap.push(&tone);

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, EngineEvent::Pulse(_)));
        publisher.shutdown();
    }
}
