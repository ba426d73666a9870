//! One decode → process → output thread per playing track

use super::dsp_chain::DspChain;
use super::pulse_tap::PulseTap;
use super::settings::SettingsCell;
use crate::backend::Backend;
use crate::error::{DecodeError, DeviceError};
use crate::pcm::StreamFormat;
use crate::sink::{AudioSink, DeviceEvent};
use crate::source::SourceDecoder;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Command wait while paused or finished
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Longest a single sink write blocks before commands are checked again
const WRITE_TIMEOUT: Duration = Duration::from_millis(20);

/// Drain slice at end of stream
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Time allowed for the thread to open its sink
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for a seek round trip
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive transient decode errors tolerated before giving up
const MAX_TRANSIENT_ERRORS: u32 = 64;

/// Decoder pre-opened for a gapless handoff
pub struct QueuedTrack {
    pub decoder: Box<dyn SourceDecoder>,
    pub path: PathBuf,
    pub duration_ms: Option<u64>,
}

enum PipelineCommand {
    Play,
    Pause,
    Seek(u64, Sender<Result<u64, DecodeError>>),
    QueueNext(QueuedTrack),
    ClearNext,
    Stop,
}

#[derive(Debug)]
pub enum PipelineEventKind {
    /// Gapless handoff to the queued decoder happened
    TrackSwitched { path: PathBuf, duration_ms: Option<u64> },
    /// Everything decoded has been played out
    Finished,
    Failed(String),
    Device(DeviceEvent),
}

#[derive(Debug)]
pub struct PipelineEvent {
    pub pipeline: u64,
    pub kind: PipelineEventKind,
}

/// State read by the controller without a round trip
struct PipelineShared {
    running: AtomicBool,
    position_ms: AtomicU64,
    /// Crossfade envelope gain as f32 bits
    gain_bits: AtomicU32,
    /// Whether this pipeline feeds the pulse tap
    tapped: AtomicBool,
}

/// Handle to a pipeline thread
pub struct Pipeline {
    id: u64,
    format: StreamFormat,
    commands: Sender<PipelineCommand>,
    shared: Arc<PipelineShared>,
    thread: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start a paused pipeline for `decoder`
    ///
    /// Blocks until the thread has opened its sink.
    pub fn spawn(
        id: u64,
        decoder: Box<dyn SourceDecoder>,
        backend: Arc<dyn Backend>,
        settings: Arc<SettingsCell>,
        tap: Arc<PulseTap>,
        events: Sender<PipelineEvent>,
        gain: f32,
    ) -> Result<Self, DeviceError> {
        let format = decoder.format();
        let (command_tx, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let shared = Arc::new(PipelineShared {
            running: AtomicBool::new(true),
            position_ms: AtomicU64::new(0),
            gain_bits: AtomicU32::new(gain.to_bits()),
            tapped: AtomicBool::new(false),
        });
        let thread_shared = shared.clone();

        let thread = thread::Builder::new()
            .name(format!("cadence-pipeline-{}", id))
            .spawn(move || {
                let sink = match backend.open_sink(format) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let mut worker = Worker::new(id, decoder, sink, settings, tap, thread_shared, command_rx, events);
                worker.run();
            })
            .map_err(|e| DeviceError::BuildStream(e.to_string()))?;

        let mut pipeline = Self {
            id,
            format,
            commands: command_tx,
            shared,
            thread: Some(thread),
        };

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(pipeline),
            Ok(Err(e)) => {
                pipeline.shutdown();
                Err(e)
            }
            Err(_) => {
                pipeline.shutdown();
                Err(DeviceError::Closed)
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn position_ms(&self) -> u64 {
        self.shared.position_ms.load(Ordering::Relaxed)
    }

    pub fn play(&self) {
        let _ = self.commands.send(PipelineCommand::Play);
    }

    pub fn pause(&self) {
        let _ = self.commands.send(PipelineCommand::Pause);
    }

    pub fn seek(&self, position_ms: u64) -> Result<u64, DecodeError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(PipelineCommand::Seek(position_ms, reply_tx))
            .map_err(|_| DecodeError::Seek("pipeline stopped".into()))?;
        let reached = reply_rx
            .recv_timeout(SEEK_TIMEOUT)
            .map_err(|_| DecodeError::Seek("pipeline did not answer".into()))??;
        self.shared.position_ms.store(reached, Ordering::Relaxed);
        Ok(reached)
    }

    pub fn queue_next(&self, track: QueuedTrack) {
        let _ = self.commands.send(PipelineCommand::QueueNext(track));
    }

    pub fn clear_next(&self) {
        let _ = self.commands.send(PipelineCommand::ClearNext);
    }

    pub fn set_gain(&self, gain: f32) {
        self.shared.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn set_tapped(&self, tapped: bool) {
        self.shared.tapped.store(tapped, Ordering::Relaxed);
    }

    /// Stop the thread and wait for it; decoder and sink drop with it
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        let _ = self.commands.send(PipelineCommand::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Pipeline {} panicked", self.id);
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the pipeline thread
struct Worker {
    id: u64,
    decoder: Box<dyn SourceDecoder>,
    sink: Box<dyn AudioSink>,
    chain: DspChain,
    settings: Arc<SettingsCell>,
    settings_version: u64,
    tap: Arc<PulseTap>,
    shared: Arc<PipelineShared>,
    commands: Receiver<PipelineCommand>,
    events: Sender<PipelineEvent>,
    next: Option<QueuedTrack>,
    /// Processed samples not yet accepted by the sink
    pending: Vec<i16>,
    playing: bool,
    draining: bool,
    finished: bool,
    applied_volume: f32,
    transient_errors: u32,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: u64,
        decoder: Box<dyn SourceDecoder>,
        sink: Box<dyn AudioSink>,
        settings: Arc<SettingsCell>,
        tap: Arc<PulseTap>,
        shared: Arc<PipelineShared>,
        commands: Receiver<PipelineCommand>,
        events: Sender<PipelineEvent>,
    ) -> Self {
        let chain = DspChain::new(decoder.format());
        Self {
            id,
            decoder,
            sink,
            chain,
            settings,
            settings_version: 0,
            tap,
            shared,
            commands,
            events,
            next: None,
            pending: Vec::new(),
            playing: false,
            draining: false,
            finished: false,
            applied_volume: -1.0,
            transient_errors: 0,
        }
    }

    fn run(&mut self) {
        debug!("Pipeline {} started", self.id);

        while self.shared.running.load(Ordering::Relaxed) {
            if !self.poll_commands() {
                break;
            }
            self.poll_device();
            self.sync_settings();

            if !self.playing || self.finished {
                continue;
            }

            if !self.pending.is_empty() {
                self.write_pending();
            } else if self.draining {
                if self.sink.drain(DRAIN_POLL) {
                    self.draining = false;
                    self.finished = true;
                    debug!("Pipeline {} played out", self.id);
                    self.emit(PipelineEventKind::Finished);
                }
            } else {
                self.decode_next();
            }
        }

        let _ = self.sink.pause();
        self.sink.flush();
        debug!("Pipeline {} stopped", self.id);
    }

    /// Handle queued commands; blocks briefly when there is nothing to play
    fn poll_commands(&mut self) -> bool {
        let idle = !self.playing || self.finished;
        let first = if idle {
            match self.commands.recv_timeout(IDLE_POLL) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        } else {
            self.commands.try_recv().ok()
        };

        let Some(first) = first else {
            return true;
        };
        if !self.handle(first) {
            return false;
        }
        while let Ok(command) = self.commands.try_recv() {
            if !self.handle(command) {
                return false;
            }
        }
        true
    }

    fn handle(&mut self, command: PipelineCommand) -> bool {
        match command {
            PipelineCommand::Play => {
                if let Err(e) = self.sink.resume() {
                    self.fail(e.to_string());
                    return false;
                }
                self.playing = true;
            }
            PipelineCommand::Pause => {
                if let Err(e) = self.sink.pause() {
                    warn!("Pipeline {} failed to pause output: {}", self.id, e);
                }
                self.playing = false;
            }
            PipelineCommand::Seek(position_ms, reply) => {
                let result = self.decoder.seek(position_ms);
                if let Ok(reached) = result {
                    self.chain.reset();
                    self.sink.flush();
                    self.pending.clear();
                    self.draining = false;
                    self.finished = false;
                    self.shared.position_ms.store(reached, Ordering::Relaxed);
                    debug!("Pipeline {} seeked to {}ms", self.id, reached);
                }
                let _ = reply.send(result);
            }
            PipelineCommand::QueueNext(track) => {
                debug!("Pipeline {} queued {}", self.id, track.path.display());
                self.next = Some(track);
            }
            PipelineCommand::ClearNext => self.next = None,
            PipelineCommand::Stop => return false,
        }
        true
    }

    fn poll_device(&mut self) {
        while let Some(event) = self.sink.poll_event() {
            self.emit(PipelineEventKind::Device(event));
        }
    }

    fn sync_settings(&mut self) {
        let version = self.settings.version();
        if version != self.settings_version {
            self.settings_version = version;
            let config = self.settings.snapshot();
            self.chain.apply(&config);
        }

        let gain = f32::from_bits(self.shared.gain_bits.load(Ordering::Relaxed));
        let volume = self.settings.read(|c| c.volume) * gain;
        if volume != self.applied_volume {
            self.applied_volume = volume;
            self.sink.set_volume(volume);
        }
    }

    fn write_pending(&mut self) {
        match self.sink.write(&self.pending, WRITE_TIMEOUT) {
            Ok(0) => {}
            Ok(_) => self.pending.clear(),
            // The controller decides between pausing and stopping
            Err(DeviceError::Lost { transient }) => {
                warn!("Pipeline {} lost its output device (transient: {})", self.id, transient);
                self.playing = false;
                self.emit(PipelineEventKind::Device(if transient {
                    DeviceEvent::TransientLoss
                } else {
                    DeviceEvent::PermanentLoss
                }));
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn decode_next(&mut self) {
        match self.decoder.next_frame() {
            Ok(Some(frame)) => {
                self.transient_errors = 0;
                self.shared.position_ms.store(frame.pts_ms, Ordering::Relaxed);
                let processed = self.chain.process(frame.samples);
                self.output(processed);
            }
            Ok(None) => self.end_of_stream(),
            Err(DecodeError::Transient(msg)) => {
                self.transient_errors += 1;
                if self.transient_errors > MAX_TRANSIENT_ERRORS {
                    self.fail(format!("too many decode errors, last: {}", msg));
                } else {
                    debug!("Pipeline {} skipped packet: {}", self.id, msg);
                }
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn output(&mut self, samples: Vec<i16>) {
        if self.shared.tapped.load(Ordering::Relaxed) {
            self.tap.push(&samples);
        }
        self.pending = samples;
    }

    fn end_of_stream(&mut self) {
        let tail = self.chain.flush();

        match self.next.take() {
            Some(next) if next.decoder.format().is_compatible(&self.decoder.format()) => {
                info!("Gapless handoff to {}", next.path.display());
                self.decoder = next.decoder;
                self.chain.reset();
                self.shared.position_ms.store(0, Ordering::Relaxed);
                self.emit(PipelineEventKind::TrackSwitched {
                    path: next.path,
                    duration_ms: next.duration_ms,
                });
            }
            Some(next) => {
                warn!("Queued track {} has a different format, not switching", next.path.display());
                self.draining = true;
            }
            None => self.draining = true,
        }

        if !tail.is_empty() {
            self.output(tail);
        }
    }

    fn fail(&mut self, message: String) {
        error!("Pipeline {} failed: {}", self.id, message);
        self.playing = false;
        self.finished = true;
        self.emit(PipelineEventKind::Failed(message));
    }

    fn emit(&self, kind: PipelineEventKind) {
        let _ = self.events.send(PipelineEvent { pipeline: self.id, kind });
    }
}
