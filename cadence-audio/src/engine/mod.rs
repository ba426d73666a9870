//! Playback engine
//!
//! [`PlaybackEngine`] is a cheap handle over a controller thread that owns
//! the state machine, the pipelines and the crossfade timer. Transport calls
//! are synchronous round trips; everything else the controller notices is
//! published as an [`EngineEvent`].
//!
//! Threads:
//! - controller: commands, pipeline events, position ticks, crossfade steps
//! - one pipeline per playing track (two while crossfading): decode, DSP,
//!   pulse tap, blocking sink writes
//! - pulse publisher: spectral analysis of the tapped output

mod controller;
mod crossfade;
mod dsp_chain;
mod pipeline;
mod pulse_tap;
mod settings;
mod state;

pub use crossfade::{envelope, plan_crossfade, CrossfadePlan, CROSSFADE_STEPS};
pub use state::{PlaybackState, Transport};

use crate::backend::{Backend, SystemBackend};
use crate::config::EngineConfig;
use crate::effects::EQ_BANDS;
use crate::error::EngineError;
use cadence_analysis::PulseSnapshot;
use controller::{Command, Controller};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use pulse_tap::{PulsePublisher, PulseTap};
use settings::SettingsCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::error;

/// Outcome of [`PlaybackEngine::prepare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareResult {
    pub success: bool,
    pub duration_ms: u64,
    pub session_id: u64,
}

impl PrepareResult {
    pub(crate) fn failed() -> Self {
        Self {
            success: false,
            duration_ms: 0,
            session_id: 0,
        }
    }
}

/// Events published by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged {
        state: PlaybackState,
        position_ms: u64,
        duration_ms: u64,
        is_playing: bool,
    },
    /// Periodic position while playing (~4/s)
    Position { position_ms: u64, duration_ms: u64 },
    /// Playback moved on to the next track (gapless, crossfade or fallback)
    TrackChanged {
        session_id: u64,
        path: PathBuf,
        duration_ms: u64,
    },
    /// The last track played to its end
    Completed,
    Error { message: String },
    Pulse(Box<PulseSnapshot>),
}

/// Snapshot of the controller's view, readable from any thread
#[derive(Debug, Clone, Default)]
pub struct EngineStatus {
    pub state: PlaybackState,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub session_id: u64,
    pub path: Option<PathBuf>,
    /// Output device was lost for good; cleared by the next successful prepare
    pub device_lost: bool,
    pub crossfading: bool,
}

/// Handle to the playback engine
pub struct PlaybackEngine {
    commands: Sender<Command>,
    events: Receiver<EngineEvent>,
    settings: Arc<SettingsCell>,
    status: Arc<Mutex<EngineStatus>>,
    tap: Arc<PulseTap>,
    controller: Option<JoinHandle<()>>,
    publisher: PulsePublisher,
}

impl PlaybackEngine {
    /// Engine on the default audio device
    pub fn new(config: EngineConfig) -> Self {
        Self::with_backend(Arc::new(SystemBackend), config)
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        // Bounded like the UI event queue: a stalled consumer loses events
        // instead of stalling playback
        let (command_tx, command_rx) = bounded(256);
        let (event_tx, event_rx) = bounded(1024);

        let tap = Arc::new(PulseTap::new(config.pulse_enabled));
        let settings = Arc::new(SettingsCell::new(config));
        let status = Arc::new(Mutex::new(EngineStatus::default()));

        let publisher = PulsePublisher::spawn(tap.clone(), settings.clone(), event_tx.clone());

        let controller = Controller::new(
            backend,
            settings.clone(),
            status.clone(),
            tap.clone(),
            command_rx,
            event_tx,
        );
        let controller = thread::Builder::new()
            .name("cadence-controller".into())
            .spawn(move || controller.run())
            .map_err(|e| error!("Failed to start engine controller: {}", e))
            .ok();

        Self {
            commands: command_tx,
            events: event_rx,
            settings,
            status,
            tap,
            controller,
            publisher,
        }
    }

    /// Receiver for engine events
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events.clone()
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| EngineError::Disconnected)?;
        reply_rx.recv().map_err(|_| EngineError::Disconnected)
    }

    /// Open `path` and get ready to play it
    ///
    /// Replaces whatever session was active. Failures leave the engine in
    /// `Error` and are also published as an `Error` event.
    pub fn prepare(&self, path: impl AsRef<Path>) -> PrepareResult {
        let path = path.as_ref().to_path_buf();
        self.request(|reply| Command::Prepare(path, reply))
            .unwrap_or_else(|_| PrepareResult::failed())
    }

    pub fn play(&self) -> Result<(), EngineError> {
        self.request(Command::Play)?
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.request(Command::Pause)?
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.request(Command::Resume)?
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.request(Command::Stop)?
    }

    /// Seek the current track, returning the position reached
    pub fn seek_to(&self, position_ms: u64) -> Result<u64, EngineError> {
        self.request(|reply| Command::Seek(position_ms, reply))?
    }

    /// Pre-open the track to play after the current one
    pub fn prepare_next_track(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref().to_path_buf();
        self.request(|reply| Command::PrepareNext(path, reply))
            .unwrap_or(false)
    }

    /// Switch to the prepared next track right away
    pub fn transition_to_next_track(&self) -> bool {
        self.request(Command::TransitionNext).unwrap_or(false)
    }

    /// Start crossfading into the prepared next track now
    pub fn start_crossfade(&self) -> bool {
        self.request(Command::StartCrossfade).unwrap_or(false)
    }

    /// Tear down the session and return to `Idle`
    pub fn release(&self) {
        let _ = self.request(Command::Release);
    }

    pub fn status(&self) -> EngineStatus {
        self.status.lock().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.status.lock().state
    }

    pub fn position_ms(&self) -> u64 {
        self.status.lock().position_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.status.lock().duration_ms
    }

    /// Current settings
    pub fn settings(&self) -> EngineConfig {
        self.settings.snapshot()
    }

    pub fn set_volume(&self, volume: f32) {
        self.settings.update(|c| c.set_volume(volume));
    }

    pub fn volume(&self) -> f32 {
        self.settings.read(|c| c.volume)
    }

    pub fn set_speed(&self, speed: f32) {
        self.settings.update(|c| c.set_speed(speed));
    }

    pub fn speed(&self) -> f32 {
        self.settings.read(|c| c.speed)
    }

    /// Pitch shift in semitones (±12)
    pub fn set_pitch(&self, semitones: f32) {
        self.settings.update(|c| c.set_pitch_semitones(semitones));
    }

    pub fn pitch(&self) -> f32 {
        self.settings.read(|c| c.pitch_semitones)
    }

    pub fn set_pitch_enabled(&self, enabled: bool) {
        self.settings.update(|c| c.pitch_enabled = enabled);
    }

    pub fn is_pitch_enabled(&self) -> bool {
        self.settings.read(|c| c.pitch_enabled)
    }

    pub fn set_gapless_enabled(&self, enabled: bool) {
        self.settings.update(|c| c.gapless_enabled = enabled);
    }

    pub fn is_gapless_enabled(&self) -> bool {
        self.settings.read(|c| c.gapless_enabled)
    }

    pub fn set_crossfade_enabled(&self, enabled: bool) {
        self.settings.update(|c| c.crossfade_enabled = enabled);
    }

    pub fn is_crossfade_enabled(&self) -> bool {
        self.settings.read(|c| c.crossfade_enabled)
    }

    /// Crossfade length, clamped to 1 - 12 seconds
    pub fn set_crossfade_duration(&self, ms: u64) {
        self.settings.update(|c| c.set_crossfade_ms(ms));
    }

    pub fn crossfade_duration(&self) -> u64 {
        self.settings.read(|c| c.crossfade_ms)
    }

    pub fn set_eq_enabled(&self, enabled: bool) {
        self.settings.update(|c| c.eq_enabled = enabled);
    }

    pub fn is_eq_enabled(&self) -> bool {
        self.settings.read(|c| c.eq_enabled)
    }

    pub fn set_eq_band_gain(&self, band: usize, gain_db: f32) {
        self.settings.update(|c| c.set_eq_band_gain(band, gain_db));
    }

    /// Gain of `band` in dB, 0 for invalid bands
    pub fn eq_band_gain(&self, band: usize) -> f32 {
        self.settings.read(|c| c.eq_gains.get(band).copied().unwrap_or(0.0))
    }

    pub fn eq_gains(&self) -> [f32; EQ_BANDS] {
        self.settings.read(|c| c.eq_gains)
    }

    pub fn set_reverb_enabled(&self, enabled: bool) {
        self.settings.update(|c| c.reverb_enabled = enabled);
    }

    pub fn is_reverb_enabled(&self) -> bool {
        self.settings.read(|c| c.reverb_enabled)
    }

    pub fn set_reverb_mix(&self, mix: f32) {
        self.settings.update(|c| c.set_reverb_mix(mix));
    }

    pub fn reverb_mix(&self) -> f32 {
        self.settings.read(|c| c.reverb_mix)
    }

    pub fn set_reverb_decay(&self, decay: f32) {
        self.settings.update(|c| c.set_reverb_decay(decay));
    }

    pub fn reverb_decay(&self) -> f32 {
        self.settings.read(|c| c.reverb_decay)
    }

    pub fn set_audio_pulse_enabled(&self, enabled: bool) {
        self.settings.update(|c| c.pulse_enabled = enabled);
        self.tap.set_enabled(enabled);
    }

    pub fn is_audio_pulse_enabled(&self) -> bool {
        self.tap.is_enabled()
    }

    pub fn set_beat_sensitivity(&self, sensitivity: f32) {
        self.settings.update(|c| c.set_beat_sensitivity(sensitivity));
    }

    pub fn set_beat_cooldown_ms(&self, cooldown_ms: f64) {
        self.settings.update(|c| c.set_beat_cooldown_ms(cooldown_ms));
    }

    /// Release everything and join the engine threads
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(controller) = self.controller.take() {
            if controller.join().is_err() {
                error!("Engine controller panicked");
            }
        }
        self.publisher.shutdown();
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
