//! Pull-based 16-bit PCM decode.
//!
//! [`StreamDecoder`] turns any [`Read`] plus an [`AudioFormatDescriptor`] into a
//! lazy, single-pass iterator of sample values:
//! - one chunk is read from the source only when every value of the previous
//!   chunk has been handed out
//! - each chunk is cut to an even length and paired into `u16` values
//! - a [`CancelHandle`] is checked before every emission and every read
//!
//! [`decode`] wraps the same thing around an undetected container so that
//! detection itself happens on the first pull.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;

use crate::config::DecodeConfig;
use crate::error::{PcmError, Result};
use crate::format::{AudioFormatDescriptor, SUPPORTED_BITS_PER_SAMPLE, pair_to_sample};
use crate::probe::{self, ProbedStream};

/// Cooperative stop signal shared between a consumer and a decoder.
///
/// Cloning yields another handle to the same flag, so it can be moved into a
/// signal handler or another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where a decode session stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Built but not pulled from yet.
    Pending,
    Active,
    /// Source reported end of stream.
    Completed,
    /// A read failed; the error was the last item.
    Failed,
    /// Cancellation was observed.
    Cancelled,
}

/// Lazy sample iterator over a raw PCM byte source.
pub struct StreamDecoder<R> {
    source: R,
    format: AudioFormatDescriptor,
    chunk: Vec<u8>,
    /// Even-rounded count of usable bytes in `chunk`.
    usable: usize,
    pos: usize,
    cancel: CancelHandle,
    status: SessionStatus,
    bytes_read: u64,
    samples_emitted: u64,
}

impl<R: Read> StreamDecoder<R> {
    pub fn new(source: R, format: AudioFormatDescriptor) -> Result<Self> {
        Self::with_config(source, format, &DecodeConfig::default())
    }

    /// Validate the format. The session starts on the first pull.
    pub fn with_config(
        source: R,
        format: AudioFormatDescriptor,
        config: &DecodeConfig,
    ) -> Result<Self> {
        if format.bits_per_sample != SUPPORTED_BITS_PER_SAMPLE {
            return Err(PcmError::UnsupportedFormat(format!(
                "{}-bit samples (only {SUPPORTED_BITS_PER_SAMPLE}-bit is decodable)",
                format.bits_per_sample
            )));
        }

        Ok(Self {
            source,
            format,
            chunk: vec![0; config.effective_chunk_bytes()],
            usable: 0,
            pos: 0,
            cancel: CancelHandle::new(),
            status: SessionStatus::Pending,
            bytes_read: 0,
            samples_emitted: 0,
        })
    }

    /// Share an existing stop signal instead of the decoder's own.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn format(&self) -> &AudioFormatDescriptor {
        &self.format
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Raw bytes pulled from the source so far, odd tails included.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn samples_emitted(&self) -> u64 {
        self.samples_emitted
    }

    fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        tracing::debug!(
            status = ?status,
            samples = self.samples_emitted,
            bytes = self.bytes_read,
            "decode session ended"
        );
    }
}

impl<R: Read> Iterator for StreamDecoder<R> {
    type Item = Result<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !matches!(self.status, SessionStatus::Pending | SessionStatus::Active) {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finish(SessionStatus::Cancelled);
                return None;
            }
            if self.status == SessionStatus::Pending {
                self.status = SessionStatus::Active;
                log_format_details(&self.format);
            }

            if self.pos < self.usable {
                let value = pair_to_sample(
                    self.chunk[self.pos],
                    self.chunk[self.pos + 1],
                    self.format.is_big_endian,
                );
                self.pos += 2;
                self.samples_emitted += 1;
                return Some(Ok(value));
            }

            match self.source.read(&mut self.chunk) {
                Ok(0) => {
                    self.finish(SessionStatus::Completed);
                    return None;
                }
                Ok(n) => {
                    self.bytes_read += n as u64;
                    // A trailing odd byte is dropped, not carried into the next chunk.
                    self.usable = n - n % 2;
                    self.pos = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.finish(SessionStatus::Failed);
                    return Some(Err(PcmError::SourceRead(e)));
                }
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for StreamDecoder<R> {}

/// Decode an already-described raw stream to completion.
pub fn decode_all<R: Read>(source: R, format: AudioFormatDescriptor) -> Result<Vec<u16>> {
    StreamDecoder::new(source, format)?.collect()
}

enum StreamState {
    Pending(Box<dyn MediaSource>, Hint),
    Open(StreamDecoder<ProbedStream>),
    Done,
}

/// Sample sequence over a container that has not been detected yet.
///
/// Detection runs on the first pull; a detection or format error is then the
/// first and only item.
pub struct SampleStream {
    state: StreamState,
    config: DecodeConfig,
    cancel: CancelHandle,
}

/// Lazily decode a self-describing container into 16-bit sample values.
pub fn decode(source: Box<dyn MediaSource>, hint: Hint) -> SampleStream {
    decode_with_config(source, hint, DecodeConfig::default())
}

pub fn decode_with_config(
    source: Box<dyn MediaSource>,
    hint: Hint,
    config: DecodeConfig,
) -> SampleStream {
    SampleStream {
        state: StreamState::Pending(source, hint),
        config,
        cancel: CancelHandle::new(),
    }
}

impl SampleStream {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Detected format, once the first pull has opened the session.
    pub fn format(&self) -> Option<&AudioFormatDescriptor> {
        match &self.state {
            StreamState::Open(decoder) => Some(decoder.format()),
            _ => None,
        }
    }

    fn open(&mut self, source: Box<dyn MediaSource>, hint: Hint) -> Result<()> {
        let probed = probe::probe(source, hint)?;
        let format = probed.format();
        let decoder = StreamDecoder::with_config(probed, format, &self.config)?
            .with_cancel(self.cancel.clone());
        self.state = StreamState::Open(decoder);
        Ok(())
    }
}

impl Iterator for SampleStream {
    type Item = Result<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, StreamState::Done) {
            StreamState::Pending(source, hint) => {
                if self.cancel.is_cancelled() {
                    return None;
                }
                if let Err(e) = self.open(source, hint) {
                    return Some(Err(e));
                }
                self.next()
            }
            StreamState::Open(mut decoder) => {
                let item = decoder.next();
                self.state = StreamState::Open(decoder);
                item
            }
            StreamState::Done => None,
        }
    }
}

impl std::iter::FusedIterator for SampleStream {}

fn log_format_details(format: &AudioFormatDescriptor) {
    match format.metrics() {
        Some(m) => tracing::info!(
            sample_rate = format.sample_rate,
            duration_s = m.duration_seconds,
            points = m.sample_count,
            interval_s = m.interval_seconds,
            "decode session started"
        ),
        None => tracing::info!(
            sample_rate = format.sample_rate,
            "decode session started (length unknown)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::sample_to_pair;
    use std::io::Cursor;

    fn le() -> AudioFormatDescriptor {
        AudioFormatDescriptor::pcm16(44_100, 1, false)
    }

    fn be() -> AudioFormatDescriptor {
        AudioFormatDescriptor::pcm16(44_100, 1, true)
    }

    fn small_chunks(bytes: usize) -> DecodeConfig {
        DecodeConfig { chunk_bytes: bytes }
    }

    /// Reader that records how often it was asked for data.
    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        reads: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.read(buf)
        }
    }

    fn counting(bytes: Vec<u8>) -> (CountingReader, Arc<std::sync::atomic::AtomicUsize>) {
        let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        (
            CountingReader {
                inner: Cursor::new(bytes),
                reads: reads.clone(),
            },
            reads,
        )
    }

    /// Reader that serves its chunks in order, then fails.
    struct ScriptedReader {
        chunks: Vec<Vec<u8>>,
        fail_with: Option<io::ErrorKind>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return match self.fail_with.take() {
                    Some(kind) => Err(io::Error::new(kind, "scripted failure")),
                    None => Ok(0),
                };
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn emits_pairs_in_stream_order() {
        let out = decode_all(Cursor::new(vec![0x01, 0x02, 0x03, 0x04]), le()).unwrap();
        assert_eq!(out, vec![0x0102, 0x0304]);
    }

    #[test]
    fn big_endian_flag_swaps_pair_roles() {
        let out = decode_all(Cursor::new(vec![0x01, 0x02, 0x03, 0x04]), be()).unwrap();
        assert_eq!(out, vec![0x0201, 0x0403]);
    }

    #[test]
    fn high_bytes_are_promoted_unsigned() {
        let out = decode_all(Cursor::new(vec![0xff, 0xff, 0x00, 0xff]), le()).unwrap();
        assert_eq!(out, vec![65535, 255]);
    }

    #[test]
    fn odd_final_chunk_drops_last_byte() {
        let source = Cursor::new(vec![1, 2, 3, 4, 5]);
        let mut decoder = StreamDecoder::new(source, le()).unwrap();
        let out: Vec<u16> = decoder.by_ref().map(|v| v.unwrap()).collect();
        assert_eq!(out, vec![0x0102, 0x0304]);
        assert_eq!(decoder.bytes_read(), 5);
        assert_eq!(decoder.status(), SessionStatus::Completed);
    }

    #[test]
    fn odd_chunk_boundary_drops_byte_without_carry() {
        let source = ScriptedReader {
            chunks: vec![vec![1, 2, 3], vec![4, 5, 6]],
            fail_with: None,
        };
        let out = decode_all(source, le()).unwrap();
        assert_eq!(out, vec![0x0102, 0x0405]);
    }

    #[test]
    fn values_continue_across_chunk_boundaries() {
        let bytes: Vec<u8> = (0u8..12).collect();
        let decoder =
            StreamDecoder::with_config(Cursor::new(bytes), le(), &small_chunks(4)).unwrap();
        let out: Vec<u16> = decoder.map(|v| v.unwrap()).collect();
        assert_eq!(out, vec![0x0001, 0x0203, 0x0405, 0x0607, 0x0809, 0x0a0b]);
    }

    #[test]
    fn exact_pairs_complete_without_error() {
        let n = 10_000usize;
        let bytes = vec![0x5a; n * 2];
        let mut decoder = StreamDecoder::new(Cursor::new(bytes), le()).unwrap();
        let mut count = 0;
        for value in decoder.by_ref() {
            assert_eq!(value.unwrap(), 0x5a5a);
            count += 1;
        }
        assert_eq!(count, n);
        assert_eq!(decoder.status(), SessionStatus::Completed);
        assert!(decoder.next().is_none());
    }

    #[test]
    fn endianness_round_trip_reconstructs_bytes() {
        let bytes: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        for format in [le(), be()] {
            let samples = decode_all(Cursor::new(bytes.clone()), format).unwrap();
            let rebuilt: Vec<u8> = samples
                .iter()
                .flat_map(|&v| sample_to_pair(v, format.is_big_endian))
                .collect();
            assert_eq!(rebuilt, bytes);
        }
    }

    #[test]
    fn cancel_between_values_stops_reads_and_emission() {
        let (source, reads) = counting(vec![7; 16]);
        let mut decoder = StreamDecoder::with_config(source, le(), &small_chunks(4)).unwrap();

        assert_eq!(decoder.next().unwrap().unwrap(), 0x0707);
        assert_eq!(reads.load(Ordering::Relaxed), 1);

        decoder.cancel_handle().cancel();
        assert!(decoder.next().is_none());
        assert!(decoder.next().is_none());
        assert_eq!(decoder.status(), SessionStatus::Cancelled);
        assert_eq!(decoder.samples_emitted(), 1);
        assert_eq!(reads.load(Ordering::Relaxed), 1);
        assert_eq!(decoder.bytes_read(), 4);
    }

    #[test]
    fn cancel_at_chunk_boundary_prevents_next_read() {
        let (source, reads) = counting(vec![1; 16]);
        let mut decoder = StreamDecoder::with_config(source, le(), &small_chunks(4)).unwrap();
        decoder.next();
        decoder.next();
        decoder.cancel();
        assert!(decoder.next().is_none());
        assert_eq!(reads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn session_starts_on_first_pull() {
        let (source, reads) = counting(vec![0, 1, 0, 2]);
        let mut decoder = StreamDecoder::new(source, le()).unwrap();
        assert_eq!(decoder.status(), SessionStatus::Pending);
        assert_eq!(reads.load(Ordering::Relaxed), 0);

        assert_eq!(decoder.next().unwrap().unwrap(), 1);
        assert_eq!(decoder.status(), SessionStatus::Active);
    }

    #[test]
    fn cancel_before_first_pull_reads_nothing() {
        let (source, reads) = counting(vec![1; 16]);
        let cancel = CancelHandle::new();
        let mut decoder = StreamDecoder::new(source, le())
            .unwrap()
            .with_cancel(cancel.clone());
        cancel.cancel();
        assert!(decoder.next().is_none());
        assert_eq!(decoder.status(), SessionStatus::Cancelled);
        assert_eq!(reads.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn read_failure_ends_sequence_after_valid_values() {
        let source = ScriptedReader {
            chunks: vec![vec![0, 1, 0, 2]],
            fail_with: Some(io::ErrorKind::BrokenPipe),
        };
        let mut decoder = StreamDecoder::new(source, le()).unwrap();
        assert_eq!(decoder.next().unwrap().unwrap(), 1);
        assert_eq!(decoder.next().unwrap().unwrap(), 2);
        match decoder.next() {
            Some(Err(PcmError::SourceRead(e))) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected SourceRead, got {other:?}"),
        }
        assert!(decoder.next().is_none());
        assert_eq!(decoder.status(), SessionStatus::Failed);
    }

    #[test]
    fn interrupted_read_is_retried() {
        struct InterruptOnce {
            interrupted: bool,
            inner: Cursor<Vec<u8>>,
        }
        impl Read for InterruptOnce {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(io::ErrorKind::Interrupted.into());
                }
                self.inner.read(buf)
            }
        }
        let source = InterruptOnce {
            interrupted: false,
            inner: Cursor::new(vec![0, 9]),
        };
        assert_eq!(decode_all(source, le()).unwrap(), vec![9]);
    }

    #[test]
    fn non_16_bit_format_is_rejected_before_reading() {
        let (source, reads) = counting(vec![0; 8]);
        let mut format = le();
        format.bits_per_sample = 24;
        let err = StreamDecoder::new(source, format).err().unwrap();
        assert!(matches!(err, PcmError::UnsupportedFormat(_)));
        assert_eq!(reads.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn empty_source_completes_immediately() {
        let out = decode_all(Cursor::new(Vec::new()), le()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn sample_stream_reports_detection_error_first() {
        let garbage = b"plain text, no container here".repeat(16);
        let source = Box::new(symphonia::core::io::ReadOnlySource::new(Cursor::new(garbage)));
        let mut stream = decode(source, Hint::new());
        assert!(matches!(stream.next(), Some(Err(PcmError::FormatDetection(_)))));
        assert!(stream.next().is_none());
        assert!(stream.format().is_none());
    }

    #[test]
    fn sample_stream_cancelled_before_pull_never_probes() {
        let source = Box::new(symphonia::core::io::ReadOnlySource::new(Cursor::new(
            b"not audio".to_vec(),
        )));
        let mut stream = decode(source, Hint::new());
        stream.cancel();
        assert!(stream.next().is_none());
    }
}
