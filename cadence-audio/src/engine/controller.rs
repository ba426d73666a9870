//! Controller thread: state machine, transitions and timers

use super::crossfade::{envelope, plan_crossfade, step_at, CROSSFADE_STEPS};
use super::pipeline::{Pipeline, PipelineEvent, PipelineEventKind, QueuedTrack};
use super::pulse_tap::PulseTap;
use super::settings::SettingsCell;
use super::state::{PlaybackState, Transport};
use super::{EngineEvent, EngineStatus, PrepareResult};
use crate::backend::Backend;
use crate::error::EngineError;
use crate::loudness::{estimate_trailing_silence, trailing_silence_in, SilenceInfo};
use crate::pcm::StreamFormat;
use crate::sink::DeviceEvent;
use crate::source::SourceDecoder;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Controller wake-up period
const TICK: Duration = Duration::from_millis(10);

/// Interval between `Position` events
const POSITION_INTERVAL: Duration = Duration::from_millis(250);

type Reply<T> = Sender<Result<T, EngineError>>;

pub(super) enum Command {
    Prepare(PathBuf, Sender<PrepareResult>),
    Play(Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    Seek(u64, Reply<u64>),
    PrepareNext(PathBuf, Sender<bool>),
    TransitionNext(Sender<bool>),
    StartCrossfade(Sender<bool>),
    Release(Sender<()>),
    Shutdown,
}

/// The track being played
struct Session {
    id: u64,
    path: PathBuf,
    format: StreamFormat,
    duration_ms: Option<u64>,
    /// None while stopped
    pipeline: Option<Pipeline>,
    /// Trailing silence, looked up once a next track is known
    silence: Option<SilenceScan>,
}

/// Trailing-silence lookup running off the controller thread
enum SilenceScan {
    Pending(Receiver<Option<SilenceInfo>>),
    Done(Option<SilenceInfo>),
}

/// Track lined up after the current one
struct NextTrack {
    path: PathBuf,
    duration_ms: Option<u64>,
    /// Decoder not yet handed to a pipeline
    decoder: Option<Box<dyn SourceDecoder>>,
    /// Handed to the current pipeline for a gapless switch
    queued: bool,
    /// A crossfade into this track was attempted and failed
    crossfade_failed: bool,
}

struct ActiveCrossfade {
    incoming: Pipeline,
    path: PathBuf,
    duration_ms: Option<u64>,
    started: Instant,
    length_ms: u64,
    step: u32,
}

pub(super) struct Controller {
    backend: Arc<dyn Backend>,
    settings: Arc<SettingsCell>,
    status: Arc<Mutex<EngineStatus>>,
    tap: Arc<PulseTap>,
    commands: Receiver<Command>,
    events: Sender<EngineEvent>,
    pipeline_tx: Sender<PipelineEvent>,
    pipeline_rx: Receiver<PipelineEvent>,

    state: PlaybackState,
    session: Option<Session>,
    next: Option<NextTrack>,
    crossfade: Option<ActiveCrossfade>,
    resume_on_regain: bool,
    device_lost: bool,
    next_session_id: u64,
    next_pipeline_id: u64,
    last_position_event: Instant,
}

impl Controller {
    pub(super) fn new(
        backend: Arc<dyn Backend>,
        settings: Arc<SettingsCell>,
        status: Arc<Mutex<EngineStatus>>,
        tap: Arc<PulseTap>,
        commands: Receiver<Command>,
        events: Sender<EngineEvent>,
    ) -> Self {
        let (pipeline_tx, pipeline_rx) = unbounded();
        Self {
            backend,
            settings,
            status,
            tap,
            commands,
            events,
            pipeline_tx,
            pipeline_rx,
            state: PlaybackState::Idle,
            session: None,
            next: None,
            crossfade: None,
            resume_on_regain: false,
            device_lost: false,
            next_session_id: 1,
            next_pipeline_id: 1,
            last_position_event: Instant::now(),
        }
    }

    pub(super) fn run(mut self) {
        info!("Playback controller started");
        loop {
            select! {
                recv(self.commands) -> command => match command {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
                recv(self.pipeline_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_pipeline_event(event);
                    }
                },
                default(TICK) => {}
            }
            self.tick();
        }
        self.release();
        info!("Playback controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Prepare(path, reply) => {
                let result = self.prepare(path);
                let _ = reply.send(result);
            }
            Command::Play(reply) => {
                let _ = reply.send(self.play());
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Command::Seek(position_ms, reply) => {
                let _ = reply.send(self.seek(position_ms));
            }
            Command::PrepareNext(path, reply) => {
                let _ = reply.send(self.prepare_next(path));
            }
            Command::TransitionNext(reply) => {
                let _ = reply.send(self.transition_to_next());
            }
            Command::StartCrossfade(reply) => {
                let ok = self.state == PlaybackState::Playing
                    && self.crossfade.is_none()
                    && self.next.is_some()
                    && self.begin_crossfade(self.settings.read(|c| c.crossfade_ms));
                let _ = reply.send(ok);
            }
            Command::Release(reply) => {
                self.release();
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    // ---- state bookkeeping -------------------------------------------------

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.try_send(event);
    }

    fn position_ms(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.pipeline.as_ref())
            .map(Pipeline::position_ms)
            .unwrap_or(0)
    }

    fn duration_ms(&self) -> u64 {
        self.session.as_ref().and_then(|s| s.duration_ms).unwrap_or(0)
    }

    fn sync_status(&self) {
        let mut status = self.status.lock();
        status.state = self.state;
        status.position_ms = self.position_ms();
        status.duration_ms = self.duration_ms();
        status.session_id = self.session.as_ref().map(|s| s.id).unwrap_or(0);
        status.path = self.session.as_ref().map(|s| s.path.clone());
        status.device_lost = self.device_lost;
        status.crossfading = self.crossfade.is_some();
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            info!("Playback state {} -> {}", self.state, state);
            self.state = state;
            self.emit(EngineEvent::StateChanged {
                state,
                position_ms: self.position_ms(),
                duration_ms: self.duration_ms(),
                is_playing: state.is_playing(),
            });
        }
        self.sync_status();
    }

    fn check(&self, command: Transport) -> Result<(), EngineError> {
        if self.state.allows(command) {
            Ok(())
        } else {
            debug!("Ignoring {} while {}", command.as_str(), self.state);
            Err(EngineError::InvalidState {
                command: command.as_str(),
                state: self.state.as_str(),
            })
        }
    }

    fn fail(&mut self, message: String) {
        error!("Playback error: {}", message);
        self.cancel_crossfade(false);
        if let Some(session) = self.session.as_mut() {
            session.pipeline = None;
        }
        self.set_state(PlaybackState::Error);
        self.emit(EngineEvent::Error { message });
    }

    // ---- session lifecycle ---------------------------------------------------

    fn spawn_pipeline(&mut self, decoder: Box<dyn SourceDecoder>, gain: f32) -> Result<Pipeline, EngineError> {
        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        Ok(Pipeline::spawn(
            id,
            decoder,
            self.backend.clone(),
            self.settings.clone(),
            self.tap.clone(),
            self.pipeline_tx.clone(),
            gain,
        )?)
    }

    /// Build a session around an open decoder with a paused pipeline
    fn open_session(&mut self, path: PathBuf, decoder: Box<dyn SourceDecoder>) -> Result<Session, EngineError> {
        let format = decoder.format();
        let pipeline = self.spawn_pipeline(decoder, 1.0)?;
        pipeline.set_tapped(true);
        self.tap.set_format(format);

        let id = self.next_session_id;
        self.next_session_id += 1;
        debug!(
            "Session {} for {}: {}Hz, {} channels, {:?}ms",
            id,
            path.display(),
            format.sample_rate,
            format.channels,
            format.duration_ms
        );
        Ok(Session {
            id,
            path,
            format,
            duration_ms: format.duration_ms,
            pipeline: Some(pipeline),
            silence: None,
        })
    }

    fn load(&mut self, path: &Path) -> Result<Session, EngineError> {
        let decoder = self.backend.open_decoder(path)?;
        self.open_session(path.to_path_buf(), decoder)
    }

    fn prepare(&mut self, path: PathBuf) -> PrepareResult {
        self.cancel_crossfade(false);
        self.session = None;
        self.next = None;
        self.resume_on_regain = false;
        self.set_state(PlaybackState::Preparing);

        match self.load(&path) {
            Ok(session) => {
                let result = PrepareResult {
                    success: true,
                    duration_ms: session.duration_ms.unwrap_or(0),
                    session_id: session.id,
                };
                info!("Prepared {}", path.display());
                self.session = Some(session);
                self.device_lost = false;
                self.set_state(PlaybackState::Ready);
                result
            }
            Err(e) => {
                self.fail(format!("Failed to prepare {}: {}", path.display(), e));
                PrepareResult::failed()
            }
        }
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.check(Transport::Play)?;

        if self.state == PlaybackState::Stopped {
            let Some(path) = self.session.as_ref().map(|s| s.path.clone()) else {
                return Err(EngineError::InvalidState {
                    command: "play",
                    state: "stopped",
                });
            };
            match self.load(&path) {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    self.fail(format!("Failed to reopen {}: {}", path.display(), e));
                    return Err(e);
                }
            }
            if let Some(next) = self.next.as_mut() {
                next.queued = false;
            }
            self.queue_next_gapless();
        }

        if let Some(pipeline) = self.session.as_ref().and_then(|s| s.pipeline.as_ref()) {
            pipeline.play();
        }
        self.resume_on_regain = false;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn do_pause(&mut self) {
        if self.crossfade.is_some() {
            self.complete_crossfade();
        }
        if let Some(pipeline) = self.session.as_ref().and_then(|s| s.pipeline.as_ref()) {
            pipeline.pause();
        }
        self.set_state(PlaybackState::Paused);
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.check(Transport::Pause)?;
        self.do_pause();
        self.resume_on_regain = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        self.check(Transport::Resume)?;
        if let Some(pipeline) = self.session.as_ref().and_then(|s| s.pipeline.as_ref()) {
            pipeline.play();
        }
        self.resume_on_regain = false;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn do_stop(&mut self) {
        self.cancel_crossfade(false);
        if let Some(session) = self.session.as_mut() {
            session.pipeline = None;
        }
        self.set_state(PlaybackState::Stopped);
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.check(Transport::Stop)?;
        self.do_stop();
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> Result<u64, EngineError> {
        self.check(Transport::Seek)?;
        self.cancel_crossfade(false);

        let pipeline = self
            .session
            .as_ref()
            .and_then(|s| s.pipeline.as_ref())
            .ok_or(EngineError::InvalidState {
                command: "seek",
                state: self.state.as_str(),
            })?;
        let reached = pipeline.seek(position_ms)?;
        debug!("Seek to {}ms reached {}ms", position_ms, reached);

        self.sync_status();
        self.emit(EngineEvent::Position {
            position_ms: reached,
            duration_ms: self.duration_ms(),
        });
        Ok(reached)
    }

    fn release(&mut self) {
        self.cancel_crossfade(false);
        self.session = None;
        self.next = None;
        self.resume_on_regain = false;
        self.set_state(PlaybackState::Idle);
    }

    // ---- next track: gapless and fallback -----------------------------------

    fn prepare_next(&mut self, path: PathBuf) -> bool {
        if self.session.is_none() {
            warn!("No active session, not preparing {}", path.display());
            return false;
        }

        let decoder = match self.backend.open_decoder(&path) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("Failed to pre-open next track {}: {}", path.display(), e);
                return false;
            }
        };
        let duration_ms = decoder.format().duration_ms;

        if let Some(previous) = self.next.take() {
            if previous.queued {
                if let Some(pipeline) = self.session.as_ref().and_then(|s| s.pipeline.as_ref()) {
                    pipeline.clear_next();
                }
            }
        }

        info!("Next track ready: {}", path.display());
        self.next = Some(NextTrack {
            path,
            duration_ms,
            decoder: Some(decoder),
            queued: false,
            crossfade_failed: false,
        });
        self.queue_next_gapless();

        if self.settings.read(|c| c.crossfade_enabled) {
            self.lookup_silence();
        }
        true
    }

    /// Hand the next decoder to the current pipeline when a gapless switch
    /// is possible
    fn queue_next_gapless(&mut self) {
        let (gapless, crossfade) = self.settings.read(|c| (c.gapless_enabled, c.crossfade_enabled));
        if !gapless || crossfade {
            return;
        }
        let (Some(session), Some(next)) = (self.session.as_ref(), self.next.as_mut()) else {
            return;
        };
        let Some(pipeline) = session.pipeline.as_ref() else {
            return;
        };

        if next.decoder.is_none() {
            match self.backend.open_decoder(&next.path) {
                Ok(decoder) => next.decoder = Some(decoder),
                Err(e) => {
                    warn!("Failed to reopen next track {}: {}", next.path.display(), e);
                    return;
                }
            }
        }
        let Some(decoder) = next.decoder.take() else {
            return;
        };

        if !decoder.format().is_compatible(&session.format) {
            info!(
                "Next track format differs ({}Hz/{}ch), gapless switch not possible",
                decoder.format().sample_rate,
                decoder.format().channels
            );
            next.decoder = Some(decoder);
            return;
        }

        pipeline.queue_next(QueuedTrack {
            decoder,
            path: next.path.clone(),
            duration_ms: next.duration_ms,
        });
        next.queued = true;
    }

    /// Start scanning the current track's tail on a worker thread
    fn lookup_silence(&mut self) {
        let (scan_secs, threshold_db) = self
            .settings
            .read(|c| (c.silence_scan_secs, c.silence_threshold_db));
        let backend = self.backend.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.silence.is_some() {
            return;
        }

        let (tx, rx) = bounded(1);
        let path = session.path.clone();
        let duration_ms = session.duration_ms;
        let spawned = std::thread::Builder::new()
            .name("cadence-silence".into())
            .spawn(move || {
                let _ = tx.send(scan_silence(backend.as_ref(), &path, duration_ms, scan_secs, threshold_db));
            });

        session.silence = Some(match spawned {
            Ok(_) => SilenceScan::Pending(rx),
            Err(e) => {
                warn!("Could not start silence scan, estimating: {}", e);
                SilenceScan::Done(session.duration_ms.and_then(estimate_trailing_silence))
            }
        });
    }

    /// Trailing silence of the current track once the scan has finished
    fn poll_silence(&mut self) -> Option<Option<SilenceInfo>> {
        let session = self.session.as_mut()?;
        let done = match session.silence.as_ref()? {
            SilenceScan::Done(silence) => return Some(*silence),
            SilenceScan::Pending(rx) => match rx.try_recv() {
                Ok(silence) => silence,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => session.duration_ms.and_then(estimate_trailing_silence),
            },
        };
        if let Some(info) = done {
            debug!("Trailing silence from {}ms (estimated: {})", info.onset_ms, info.estimated);
        }
        session.silence = Some(SilenceScan::Done(done));
        Some(done)
    }

    /// Open the next track as the new session, playing if we were
    fn start_next(&mut self, next: NextTrack, play: bool) -> bool {
        self.cancel_crossfade(false);
        if let Some(session) = self.session.as_mut() {
            session.pipeline = None;
        }

        let decoder = match next.decoder {
            Some(decoder) => Ok(decoder),
            None => self.backend.open_decoder(&next.path),
        };
        let session = match decoder
            .map_err(EngineError::from)
            .and_then(|decoder| self.open_session(next.path.clone(), decoder))
        {
            Ok(session) => session,
            Err(e) => {
                self.fail(format!("Failed to start {}: {}", next.path.display(), e));
                return false;
            }
        };

        if play {
            if let Some(pipeline) = session.pipeline.as_ref() {
                pipeline.play();
            }
        }
        self.session = Some(session);
        self.set_state(if play {
            PlaybackState::Playing
        } else {
            PlaybackState::Ready
        });
        self.announce_current();
        true
    }

    fn transition_to_next(&mut self) -> bool {
        if self.crossfade.is_some() {
            self.complete_crossfade();
            return true;
        }
        let Some(next) = self.next.take() else {
            return false;
        };
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Error) {
            self.next = Some(next);
            return false;
        }
        info!("Switching to {}", next.path.display());
        let play = self.state == PlaybackState::Playing;
        self.start_next(next, play)
    }

    fn announce_current(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        info!("Now playing {}", session.path.display());
        self.emit(EngineEvent::TrackChanged {
            session_id: session.id,
            path: session.path.clone(),
            duration_ms: session.duration_ms.unwrap_or(0),
        });
    }

    // ---- crossfade ------------------------------------------------------------

    fn begin_crossfade(&mut self, length_ms: u64) -> bool {
        let Some(mut next) = self.next.take() else {
            return false;
        };
        if next.queued {
            if let Some(pipeline) = self.session.as_ref().and_then(|s| s.pipeline.as_ref()) {
                pipeline.clear_next();
            }
            next.queued = false;
        }

        let decoder = match next.decoder.take() {
            Some(decoder) => Ok(decoder),
            None => self.backend.open_decoder(&next.path),
        };
        let incoming = match decoder
            .map_err(EngineError::from)
            .and_then(|decoder| self.spawn_pipeline(decoder, 0.0))
        {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!("Crossfade into {} failed, falling back: {}", next.path.display(), e);
                next.crossfade_failed = true;
                self.next = Some(next);
                return false;
            }
        };

        incoming.play();
        info!("Crossfading into {} over {}ms", next.path.display(), length_ms);
        self.crossfade = Some(ActiveCrossfade {
            incoming,
            path: next.path,
            duration_ms: next.duration_ms,
            started: Instant::now(),
            length_ms,
            step: 0,
        });
        self.sync_status();
        true
    }

    fn step_crossfade(&mut self) {
        let Some(fade) = self.crossfade.as_mut() else {
            return;
        };
        let step = step_at(fade.started.elapsed().as_millis() as u64, fade.length_ms);
        if step == fade.step {
            return;
        }
        fade.step = step;
        let (outgoing, incoming) = envelope(step);
        fade.incoming.set_gain(incoming);
        if let Some(pipeline) = self.session.as_ref().and_then(|s| s.pipeline.as_ref()) {
            pipeline.set_gain(outgoing);
        }
        if step >= CROSSFADE_STEPS {
            self.complete_crossfade();
        }
    }

    /// Promote the incoming pipeline and drop the outgoing one
    fn complete_crossfade(&mut self) {
        let Some(fade) = self.crossfade.take() else {
            return;
        };
        fade.incoming.set_gain(1.0);
        fade.incoming.set_tapped(true);
        let format = fade.incoming.format();
        self.tap.set_format(format);

        let id = self.next_session_id;
        self.next_session_id += 1;
        let session = Session {
            id,
            path: fade.path,
            format,
            duration_ms: fade.duration_ms,
            pipeline: Some(fade.incoming),
            silence: None,
        };
        // Dropping the old session joins its pipeline
        self.session = None;
        self.session = Some(session);
        self.sync_status();
        self.announce_current();
    }

    /// Abort a running crossfade, keeping the next track lined up
    ///
    /// A failed fade is not retried automatically; an interrupted one
    /// re-arms once playback reaches the fade point again.
    fn cancel_crossfade(&mut self, failed: bool) {
        let Some(fade) = self.crossfade.take() else {
            return;
        };
        debug!("Crossfade into {} cancelled", fade.path.display());
        if let Some(pipeline) = self.session.as_ref().and_then(|s| s.pipeline.as_ref()) {
            pipeline.set_gain(1.0);
        }
        self.next = Some(NextTrack {
            path: fade.path,
            duration_ms: fade.duration_ms,
            decoder: None,
            queued: false,
            crossfade_failed: failed,
        });
        self.sync_status();
    }

    /// Start an automatic crossfade once the fade-out point is reached
    fn maybe_start_crossfade(&mut self) {
        if self.state != PlaybackState::Playing || self.crossfade.is_some() {
            return;
        }
        let (enabled, configured_ms) = self.settings.read(|c| (c.crossfade_enabled, c.crossfade_ms));
        if !enabled || self.next.as_ref().map_or(true, |n| n.crossfade_failed) {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(duration_ms) = session.duration_ms else {
            return;
        };
        if session.silence.is_none() {
            self.lookup_silence();
        }
        // Until the scan answers, plan against the full duration
        let silence = self.poll_silence().flatten();

        let plan = plan_crossfade(configured_ms, duration_ms, silence, self.tap.bpm());
        if self.position_ms() >= plan.start_at_ms {
            self.begin_crossfade(plan.length_ms);
        }
    }

    // ---- events from pipelines and timers ------------------------------------

    fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        let current = self
            .session
            .as_ref()
            .and_then(|s| s.pipeline.as_ref())
            .map(Pipeline::id);
        let incoming = self.crossfade.as_ref().map(|f| f.incoming.id());

        if Some(event.pipeline) == incoming {
            match event.kind {
                PipelineEventKind::Failed(message) => {
                    warn!("Incoming crossfade pipeline failed: {}", message);
                    self.cancel_crossfade(true);
                }
                PipelineEventKind::Finished => self.complete_crossfade(),
                PipelineEventKind::Device(device) => self.handle_device_event(device),
                PipelineEventKind::TrackSwitched { .. } => {}
            }
            return;
        }
        if Some(event.pipeline) != current {
            debug!("Dropping event from retired pipeline {}", event.pipeline);
            return;
        }

        match event.kind {
            PipelineEventKind::TrackSwitched { path, duration_ms } => {
                let id = self.next_session_id;
                self.next_session_id += 1;
                self.next = None;
                if let Some(session) = self.session.as_mut() {
                    session.id = id;
                    session.path = path;
                    session.duration_ms = duration_ms;
                    session.silence = None;
                }
                self.sync_status();
                self.announce_current();
            }
            PipelineEventKind::Finished => self.track_finished(),
            PipelineEventKind::Failed(message) => self.fail(message),
            PipelineEventKind::Device(device) => self.handle_device_event(device),
        }
    }

    fn track_finished(&mut self) {
        if self.crossfade.is_some() {
            self.complete_crossfade();
            return;
        }
        if let Some(next) = self.next.take() {
            warn!("Gapless switch unavailable, starting {} directly", next.path.display());
            self.start_next(next, true);
            return;
        }
        info!("Playback completed");
        if let Some(session) = self.session.as_mut() {
            session.pipeline = None;
        }
        self.set_state(PlaybackState::Stopped);
        self.emit(EngineEvent::Completed);
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::TransientLoss => {
                if self.state == PlaybackState::Playing {
                    warn!("Output device temporarily lost, pausing");
                    self.do_pause();
                    self.resume_on_regain = true;
                }
            }
            DeviceEvent::PermanentLoss => {
                warn!("Output device lost, stopping");
                self.device_lost = true;
                self.resume_on_regain = false;
                if matches!(
                    self.state,
                    PlaybackState::Ready | PlaybackState::Playing | PlaybackState::Paused
                ) {
                    self.do_stop();
                } else {
                    self.sync_status();
                }
            }
            DeviceEvent::Regained => {
                self.device_lost = false;
                if self.resume_on_regain && self.state == PlaybackState::Paused {
                    info!("Output device regained, resuming");
                    let _ = self.resume();
                }
                self.resume_on_regain = false;
                self.sync_status();
            }
        }
    }

    fn tick(&mut self) {
        self.step_crossfade();
        self.maybe_start_crossfade();

        if self.state == PlaybackState::Playing {
            {
                let mut status = self.status.lock();
                status.position_ms = self.position_ms();
            }
            if self.last_position_event.elapsed() >= POSITION_INTERVAL {
                self.last_position_event = Instant::now();
                self.emit(EngineEvent::Position {
                    position_ms: self.position_ms(),
                    duration_ms: self.duration_ms(),
                });
            }
        }
    }
}

/// Measure where `path` turns silent, estimating when it cannot be decoded
pub(super) fn scan_silence(
    backend: &dyn Backend,
    path: &Path,
    duration_ms: Option<u64>,
    scan_secs: f64,
    threshold_db: f64,
) -> Option<SilenceInfo> {
    let measured = backend
        .open_decoder(path)
        .map_err(|e| e.to_string())
        .and_then(|mut decoder| {
            trailing_silence_in(decoder.as_mut(), scan_secs, threshold_db).map_err(|e| e.to_string())
        });

    match measured {
        Ok(silence) => silence,
        Err(e) => {
            warn!("Trailing silence scan of {} failed, estimating: {}", path.display(), e);
            duration_ms.and_then(estimate_trailing_silence)
        }
    }
}
