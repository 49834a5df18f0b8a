//! Container detection.
//!
//! Uses Symphonia to:
//! - probe the input container and pick its default track
//! - turn the track's codec parameters into an [`AudioFormatDescriptor`]
//! - expose the raw PCM payload that follows the header as a plain [`Read`]
//!
//! Nothing here interprets sample bytes; that is the decoder's job.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use symphonia::core::codecs::{CodecParameters, CodecType};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{PcmError, Result};
use crate::format::{AudioFormatDescriptor, SUPPORTED_BITS_PER_SAMPLE};

/// Offset and block-size fields at the head of an AIFF `SSND` chunk. Symphonia
/// counts them as sound data when sizing the stream.
const AIFF_SSND_PREFIX_BYTES: u64 = 8;

/// A detected stream: the parsed format plus the PCM bytes after the header.
pub struct ProbedStream {
    reader: Box<dyn FormatReader>,
    track_id: u32,
    format: AudioFormatDescriptor,
    codec: Option<&'static str>,
    pending: Vec<u8>,
    pos: usize,
    /// Payload bytes still to hand out, when the container states a length.
    remaining: Option<u64>,
    finished: bool,
    deferred_error: Option<io::Error>,
}

/// Probe an arbitrary Symphonia [`MediaSource`] (seekable or not).
pub fn probe(source: Box<dyn MediaSource>, hint: Hint) -> Result<ProbedStream> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let reader = probed.format;
    let track = reader
        .default_track()
        .ok_or_else(|| PcmError::FormatDetection("no default audio track".to_string()))?;

    let track_id = track.id;
    let codec = codec_label(track.codec_params.codec);
    let mut format = descriptor_from_params(&track.codec_params)?;
    let remaining = correct_payload_length(&mut format);

    tracing::debug!(
        track_id,
        codec = codec.unwrap_or("unknown"),
        sample_rate = format.sample_rate,
        channels = format.channels,
        big_endian = format.is_big_endian,
        "probed stream"
    );

    Ok(ProbedStream {
        reader,
        track_id,
        format,
        codec,
        pending: Vec::new(),
        pos: 0,
        remaining,
        finished: false,
        deferred_error: None,
    })
}

/// Probe a non-seekable reader such as a pipe or socket.
pub fn probe_reader<R>(reader: R, hint: Hint) -> Result<ProbedStream>
where
    R: Read + Send + Sync + 'static,
{
    probe(Box::new(ReadOnlySource::new(reader)), hint)
}

/// Probe a file, using its extension as a hint.
pub fn probe_file(path: &Path) -> Result<ProbedStream> {
    let file = File::open(path).map_err(PcmError::SourceRead)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    probe(Box::new(file), hint)
}

impl ProbedStream {
    pub fn format(&self) -> AudioFormatDescriptor {
        self.format
    }

    /// Codec label for logs and `info` output.
    pub fn codec(&self) -> Option<&'static str> {
        self.codec
    }

    /// Pull the next packet of the selected track into `pending`.
    ///
    /// Returns `Ok(false)` at end of stream.
    fn refill(&mut self) -> io::Result<bool> {
        loop {
            match self.reader.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != self.track_id {
                        continue;
                    }
                    self.pending.clear();
                    self.pending.extend_from_slice(packet.buf());
                    self.pos = 0;
                    return Ok(true);
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(SymphoniaError::IoError(e)) => return Err(e),
                Err(other) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, other.to_string()));
                }
            }
        }
    }
}

/// Fills `out` from as many packets as needed, like a line-level audio stream
/// read. An error hit after some bytes were copied is reported on the next call.
impl Read for ProbedStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }

        let limit = match self.remaining {
            Some(left) => out.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
            None => out.len(),
        };

        let mut written = 0;
        while written < limit {
            if self.pos >= self.pending.len() {
                if self.finished {
                    break;
                }
                match self.refill() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.finished = true;
                        break;
                    }
                    Err(e) if written == 0 => return Err(e),
                    Err(e) => {
                        self.deferred_error = Some(e);
                        break;
                    }
                }
            }

            let n = (limit - written).min(self.pending.len() - self.pos);
            out[written..written + n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }
        if let Some(left) = self.remaining.as_mut() {
            *left -= written as u64;
        }
        Ok(written)
    }
}

/// Build a descriptor from track parameters, rejecting anything that is not
/// 16-bit linear PCM.
fn descriptor_from_params(params: &CodecParameters) -> Result<AudioFormatDescriptor> {
    let is_big_endian = pcm_is_big_endian(params.codec).ok_or_else(|| {
        PcmError::UnsupportedFormat(format!(
            "codec {} is not linear PCM",
            codec_label(params.codec).unwrap_or("unknown")
        ))
    })?;

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| PcmError::FormatDetection("unknown sample rate".to_string()))?;
    if sample_rate == 0 {
        return Err(PcmError::FormatDetection("zero sample rate".to_string()));
    }

    let channels = params
        .channels
        .ok_or_else(|| PcmError::FormatDetection("unknown channel layout".to_string()))?
        .count();
    let channels = u16::try_from(channels)
        .map_err(|_| PcmError::UnsupportedFormat(format!("{channels} channels")))?;

    let bits = params
        .bits_per_sample
        .or(params.bits_per_coded_sample)
        .ok_or_else(|| PcmError::FormatDetection("unknown bit depth".to_string()))?;
    if bits != u32::from(SUPPORTED_BITS_PER_SAMPLE) {
        return Err(PcmError::UnsupportedFormat(format!(
            "{bits}-bit samples (only {SUPPORTED_BITS_PER_SAMPLE}-bit is decodable)"
        )));
    }

    let mut format = AudioFormatDescriptor::pcm16(sample_rate, channels, is_big_endian);
    format.frame_length = params.n_frames;
    Ok(format)
}

/// Fix up the frame count and return the payload size in bytes.
///
/// Big-endian PCM only comes from the AIFF reader, whose count includes the
/// `SSND` prefix; without the fix the stream would run into the next chunk.
/// Returns `None` when the container gives no length.
fn correct_payload_length(format: &mut AudioFormatDescriptor) -> Option<u64> {
    let frame_bytes = format.frame_bytes() as u64;
    let mut bytes = format.frame_length?.saturating_mul(frame_bytes);
    if format.is_big_endian {
        bytes = bytes.saturating_sub(AIFF_SSND_PREFIX_BYTES);
    }
    let frames = bytes / frame_bytes;
    format.frame_length = Some(frames);
    Some(frames * frame_bytes)
}

/// Byte order of a linear PCM codec, `None` for anything else.
fn pcm_is_big_endian(codec: CodecType) -> Option<bool> {
    use symphonia::core::codecs::*;
    match codec {
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_U16LE | CODEC_TYPE_PCM_S24LE
        | CODEC_TYPE_PCM_U24LE | CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_U32LE
        | CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_S8 | CODEC_TYPE_PCM_U8 => {
            Some(false)
        }
        CODEC_TYPE_PCM_S16BE | CODEC_TYPE_PCM_U16BE | CODEC_TYPE_PCM_S24BE
        | CODEC_TYPE_PCM_U24BE | CODEC_TYPE_PCM_S32BE | CODEC_TYPE_PCM_U32BE
        | CODEC_TYPE_PCM_F32BE | CODEC_TYPE_PCM_F64BE => Some(true),
        _ => None,
    }
}

/// Best-effort codec label.
fn codec_label(codec: CodecType) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE => "PCM_S16LE",
        CODEC_TYPE_PCM_S16BE => "PCM_S16BE",
        CODEC_TYPE_PCM_U16LE | CODEC_TYPE_PCM_U16BE => "PCM_U16",
        CODEC_TYPE_PCM_S8 | CODEC_TYPE_PCM_U8 => "PCM_8",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}
