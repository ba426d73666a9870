//! Symphonia-backed file decoder

use super::SourceDecoder;
use crate::error::{DecodeError, SourceError};
use crate::pcm::{PcmFrame, StreamFormat};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::debug;

/// Streaming decoder for one audio file
pub struct SymphoniaDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    format: StreamFormat,
    /// Frames emitted since the last seek, used when packets carry no timestamp
    frames_since_seek: u64,
    seek_base_ms: u64,
}

impl SymphoniaDecoder {
    /// Open and probe a file
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }

        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| SourceError::UnsupportedFormat(e.to_string()))?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(SourceError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| SourceError::UnsupportedFormat("unknown sample rate".into()))?;
        // Undeclared layouts default to stereo; packets are re-fitted per decode
        let source_channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);
        if source_channels == 0 {
            return Err(SourceError::UnsupportedChannels(0));
        }
        let channels = source_channels.min(2) as u16;

        let time_base = codec_params.time_base;
        let duration_ms = match (time_base, codec_params.n_frames) {
            (Some(tb), Some(frames)) => Some(time_to_ms(tb.calc_time(frames))),
            (None, Some(frames)) => Some(frames * 1000 / sample_rate as u64),
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| SourceError::Decoder(e.to_string()))?;

        debug!(
            "Opened {}: {}Hz, {} channels, {:?}ms",
            path.display(),
            sample_rate,
            source_channels,
            duration_ms
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            time_base,
            format: StreamFormat {
                sample_rate,
                channels,
                duration_ms,
            },
            frames_since_seek: 0,
            seek_base_ms: 0,
        })
    }

    fn packet_pts_ms(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => time_to_ms(tb.calc_time(ts)),
            None => self.seek_base_ms + self.frames_since_seek * 1000 / self.format.sample_rate as u64,
        }
    }
}

fn time_to_ms(time: Time) -> u64 {
    time.seconds * 1000 + (time.frac * 1000.0) as u64
}

/// Re-interleave `samples` from `from` channels to `to` channels
///
/// Extra channels are dropped; a mono packet is copied to every channel.
fn fit_channels(samples: &[i16], from: usize, to: usize) -> Vec<i16> {
    if from == to {
        return samples.to_vec();
    }
    if from == 0 {
        return Vec::new();
    }
    samples
        .chunks_exact(from)
        .flat_map(|frame| (0..to).map(move |ch| frame[ch.min(from - 1)]))
        .collect()
}

impl SourceDecoder for SymphoniaDecoder {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<PcmFrame>, DecodeError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                // Chained streams are not followed
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(DecodeError::Fatal(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let pts_ms = self.packet_pts_ms(packet.ts());

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => return Err(DecodeError::Transient(e.to_string())),
                Err(SymphoniaError::IoError(e)) => return Err(DecodeError::Transient(e.to_string())),
                Err(e) => return Err(DecodeError::Fatal(e.to_string())),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            let channels = self.format.channels as usize;
            let samples = fit_channels(sample_buf.samples(), spec.channels.count(), channels);
            if samples.is_empty() {
                continue;
            }

            self.frames_since_seek += (samples.len() / channels) as u64;

            return Ok(Some(PcmFrame {
                samples,
                channels: self.format.channels,
                sample_rate: self.format.sample_rate,
                pts_ms,
            }));
        }
    }

    fn seek(&mut self, position_ms: u64) -> Result<u64, DecodeError> {
        let target = match self.format.duration_ms {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        };

        let time = Time::new(target / 1000, (target % 1000) as f64 / 1000.0);
        let seeked = self
            .format_reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::Seek(e.to_string()))?;

        self.decoder.reset();

        let actual = match self.time_base {
            Some(tb) => time_to_ms(tb.calc_time(seeked.actual_ts)),
            None => target,
        };
        self.seek_base_ms = actual;
        self.frames_since_seek = 0;
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_wav(dir: &TempDir, name: &str, channels: u16, frames: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let spec = WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            let value = ((i as f32 * 0.05).sin() * 10000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_fit_channels() {
        assert_eq!(fit_channels(&[1, 2, 3, 4], 2, 2), vec![1, 2, 3, 4]);
        // Mono packets in a stereo stream keep their length in time
        assert_eq!(fit_channels(&[1, 2], 1, 2), vec![1, 1, 2, 2]);
        // Surround keeps the front pair
        assert_eq!(fit_channels(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12], 6, 2), vec![1, 2, 7, 8]);
        assert!(fit_channels(&[1, 2], 0, 2).is_empty());
    }

    #[test]
    fn test_missing_file() {
        let result = SymphoniaDecoder::open(Path::new("/nonexistent/track.flac"));
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_decode_wav_to_end() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "tone.wav", 2, 44100);
        let mut decoder = SymphoniaDecoder::open(&path).unwrap();

        let format = decoder.format();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.channels, 2);
        assert_eq!(format.duration_ms, Some(1000));

        let mut frames = 0;
        let mut last_pts = 0;
        while let Some(frame) = decoder.next_frame().unwrap() {
            assert!(frame.pts_ms >= last_pts);
            last_pts = frame.pts_ms;
            frames += frame.frames();
        }
        assert_eq!(frames, 44100);
    }

    #[test]
    fn test_seek_moves_position() {
        let dir = TempDir::new().unwrap();
        let path = write_wav(&dir, "tone.wav", 1, 88200);
        let mut decoder = SymphoniaDecoder::open(&path).unwrap();
        let reached = decoder.seek(1000).unwrap();
        assert!((reached as i64 - 1000).abs() <= 50);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(frame.pts_ms >= 950);
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(SymphoniaDecoder::open(&path).is_err());
    }
}
