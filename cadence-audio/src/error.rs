//! Error types for the playback engine and its collaborators

use std::path::PathBuf;
use thiserror::Error;

/// Failure opening or probing an audio source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Unsupported channel layout: {0} channels")]
    UnsupportedChannels(usize),

    #[error("Decoder error: {0}")]
    Decoder(String),
}

/// Failure of the audio output device
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No output device available")]
    NoDevice,

    #[error("Failed to build output stream: {0}")]
    BuildStream(String),

    #[error("Failed to start output stream: {0}")]
    PlayStream(String),

    #[error("Output device lost (transient: {transient})")]
    Lost { transient: bool },

    #[error("Output sink closed")]
    Closed,
}

/// Failure of one decode iteration
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Recoverable: the packet is skipped and decoding continues
    #[error("Transient decode error: {0}")]
    Transient(String),

    #[error("Seek failed: {0}")]
    Seek(String),

    #[error("Fatal decode error: {0}")]
    Fatal(String),
}

/// Errors surfaced by the playback engine handle
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Invalid state for {command}: {state}")]
    InvalidState {
        command: &'static str,
        state: &'static str,
    },

    #[error("Engine controller disconnected")]
    Disconnected,
}

/// Errors from the batch loudness analyzer
#[derive(Debug, Error)]
pub enum LoudnessError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("No audio samples decoded")]
    NoSamples,
}
