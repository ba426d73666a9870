//! Audio engine for Cadence - decoding, live DSP, and output
//!
//! This crate provides the playback pipeline:
//! - Source: Symphonia decoding to interleaved 16-bit PCM
//! - Effects: 5-band EQ and Schroeder reverb with soft clipping
//! - Pitch: Pitch shifting and speed change on interleaved PCM
//! - Sink: cpal output with resampling, volume, and device events
//! - Engine: Transport state machine, gapless switching, and crossfades
//! - Loudness: EBU R128 style analysis and trailing-silence detection

mod backend;
mod config;
mod engine;
mod error;
mod pcm;

pub mod effects;
pub mod filters;
pub mod loudness;
pub mod pitch;
pub mod sink;
pub mod source;

#[cfg(test)]
mod test_support;

pub use backend::{Backend, SystemBackend};
pub use config::{EngineConfig, MAX_CROSSFADE_MS, MAX_PITCH_SEMITONES, MIN_CROSSFADE_MS};
pub use effects::{Effect, EqualizerReverbStage, EQ_BANDS, EQ_FREQUENCIES};
pub use engine::{
    envelope, plan_crossfade, CrossfadePlan, EngineEvent, EngineStatus, PlaybackEngine, PlaybackState,
    PrepareResult, Transport, CROSSFADE_STEPS,
};
pub use error::{DecodeError, DeviceError, EngineError, LoudnessError, SourceError};
pub use loudness::{analyze, find_trailing_silence, GatedLoudnessMeter, LoudnessReport, SilenceInfo};
pub use pcm::{PcmFrame, StreamFormat};
pub use pitch::PitchShiftStage;
pub use sink::{AudioSink, CpalSink, DeviceEvent};
pub use source::{SourceDecoder, SymphoniaDecoder};

pub use cadence_analysis::PulseSnapshot;
