//! Decoded audio sources
//!
//! The engine pulls PCM through [`SourceDecoder`]; the default implementation
//! wraps symphonia.

mod decoder;

pub use decoder::SymphoniaDecoder;

use crate::error::DecodeError;
use crate::pcm::{PcmFrame, StreamFormat};

/// Pull-based decoder producing interleaved 16-bit PCM
pub trait SourceDecoder: Send {
    /// Format of every frame this decoder produces
    fn format(&self) -> StreamFormat;

    /// Decode the next block, `Ok(None)` at end of stream
    fn next_frame(&mut self) -> Result<Option<PcmFrame>, DecodeError>;

    /// Seek to `position_ms`, returning the position actually reached
    fn seek(&mut self, position_ms: u64) -> Result<u64, DecodeError>;
}
