//! Platform collaborators the engine is built on

use crate::error::{DeviceError, SourceError};
use crate::pcm::StreamFormat;
use crate::sink::{AudioSink, CpalSink};
use crate::source::{SourceDecoder, SymphoniaDecoder};
use std::path::Path;

/// Factory for decoders and output sinks
///
/// `open_sink` is always called on the pipeline thread that will use the
/// sink.
pub trait Backend: Send + Sync {
    fn open_decoder(&self, path: &Path) -> Result<Box<dyn SourceDecoder>, SourceError>;

    fn open_sink(&self, format: StreamFormat) -> Result<Box<dyn AudioSink>, DeviceError>;
}

/// symphonia decoding and cpal output on the default device
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl Backend for SystemBackend {
    fn open_decoder(&self, path: &Path) -> Result<Box<dyn SourceDecoder>, SourceError> {
        Ok(Box::new(SymphoniaDecoder::open(path)?))
    }

    fn open_sink(&self, format: StreamFormat) -> Result<Box<dyn AudioSink>, DeviceError> {
        Ok(Box::new(CpalSink::open(format)?))
    }
}
