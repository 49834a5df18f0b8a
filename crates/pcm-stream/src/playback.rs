//! Blocking playback of a raw PCM stream.
//!
//! [`PlaybackSink`] copies bytes from a source into an [`OutputDevice`] in
//! fixed chunks until end of stream, then drains the device. Unlike the decode
//! path it is best-effort: read errors are logged and skipped.
//!
//! [`CpalOutput`] is the real device. Writes feed a bounded [`SampleQueue`]
//! and block while it is full; the CPAL callback drains the queue without
//! blocking and fills underruns with silence.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;

use crate::config::PlaybackConfig;
use crate::device;
use crate::error::{PcmError, Result};
use crate::format::AudioFormatDescriptor;
use crate::probe;
use crate::queue::{SampleQueue, capacity_for};

/// Consecutive failed reads after which playback gives up on the source.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 16;

/// Destination for raw PCM bytes.
pub trait OutputDevice {
    /// Queue bytes for output, blocking while the device is saturated.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Block until everything written has been played, then release the device.
    fn drain(&mut self) -> Result<()>;
}

/// Outcome of one playback run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub bytes_written: u64,
    pub read_errors: u32,
}

/// Copies a byte source to an output device.
#[derive(Clone, Debug, Default)]
pub struct PlaybackSink {
    config: PlaybackConfig,
}

impl PlaybackSink {
    pub fn new(config: PlaybackConfig) -> Self {
        Self { config }
    }

    /// Copy `source` into `device` until end of stream, then drain it.
    ///
    /// Read failures are logged and the loop keeps going; only a long run of
    /// them ends playback early. Device failures are returned.
    pub fn play<R, D>(&self, mut source: R, device: &mut D) -> Result<PlaybackReport>
    where
        R: Read,
        D: OutputDevice + ?Sized,
    {
        let mut buf = vec![0u8; self.config.effective_chunk_bytes()];
        let mut report = PlaybackReport::default();
        let mut consecutive_errors = 0u32;

        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    consecutive_errors = 0;
                    device.write(&buf[..n])?;
                    report.bytes_written += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    report.read_errors += 1;
                    consecutive_errors += 1;
                    tracing::warn!("playback read error: {e}");
                    if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        tracing::warn!(
                            errors = consecutive_errors,
                            "source keeps failing; stopping playback"
                        );
                        break;
                    }
                }
            }
        }

        device.drain()?;
        tracing::info!(
            bytes = report.bytes_written,
            read_errors = report.read_errors,
            "playback finished"
        );
        Ok(report)
    }
}

/// Detect `source`, open an output device for it and play it to the end.
pub fn play(
    source: Box<dyn MediaSource>,
    hint: Hint,
    device_name: Option<&str>,
    config: &PlaybackConfig,
) -> Result<PlaybackReport> {
    let probed = probe::probe(source, hint)?;
    let mut output = open_default_output(&probed.format(), device_name, config)?;
    tracing::info!(codec = probed.codec().unwrap_or("unknown"), "playing");
    PlaybackSink::new(config.clone()).play(probed, &mut output)
}

/// Output device backed by a CPAL stream.
pub struct CpalOutput {
    queue: Arc<SampleQueue>,
    stream: cpal::Stream,
    is_big_endian: bool,
    carry: Option<u8>,
    scratch: Vec<f32>,
    played_frames: Arc<AtomicU64>,
    underrun_frames: Arc<AtomicU64>,
}

/// Open the selected (or default) output device for `format`.
///
/// Any failure along the way is reported as [`PcmError::DeviceUnavailable`].
pub fn open_default_output(
    format: &AudioFormatDescriptor,
    device_name: Option<&str>,
    config: &PlaybackConfig,
) -> Result<CpalOutput> {
    open_cpal_output(format, device_name, config)
        .map_err(|e| PcmError::DeviceUnavailable(format!("{e:#}")))
}

fn open_cpal_output(
    format: &AudioFormatDescriptor,
    device_name: Option<&str>,
    config: &PlaybackConfig,
) -> anyhow::Result<CpalOutput> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let supported = device::pick_output_config(&device, format)?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }

    let source_rate = format.sample_rate.round() as u32;
    tracing::info!(
        device = %device.description()?,
        source_rate_hz = source_rate,
        output_rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        buffer_size = ?stream_config.buffer_size,
        "device output config"
    );
    if stream_config.sample_rate != source_rate {
        tracing::warn!(
            source_rate_hz = source_rate,
            output_rate_hz = stream_config.sample_rate,
            "device does not support the source rate; playback speed will differ"
        );
    }

    let channels = usize::from(format.channels.max(1));
    let queue = Arc::new(SampleQueue::new(
        channels,
        capacity_for(source_rate, channels, config.buffer_seconds),
    ));
    let played_frames = Arc::new(AtomicU64::new(0));
    let underrun_frames = Arc::new(AtomicU64::new(0));

    let stream = build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        CallbackConfig {
            queue: queue.clone(),
            refill_max_frames: config.refill_max_frames.max(1),
            played_frames: played_frames.clone(),
            underrun_frames: underrun_frames.clone(),
        },
    )?;
    stream.play()?;

    Ok(CpalOutput {
        queue,
        stream,
        is_big_endian: format.is_big_endian,
        carry: None,
        scratch: Vec::new(),
        played_frames,
        underrun_frames,
    })
}

impl CpalOutput {
    /// Frames handed to the device so far.
    pub fn played_frames(&self) -> u64 {
        self.played_frames.load(Ordering::Relaxed)
    }
}

impl OutputDevice for CpalOutput {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.scratch.clear();
        bytes_to_f32(&mut self.carry, bytes, self.is_big_endian, &mut self.scratch);
        let accepted = self.queue.push_blocking(&self.scratch);
        if accepted < self.scratch.len() {
            return Err(PcmError::Device("output stream closed".to_string()));
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.queue.close();
        self.queue.wait_drained();
        // Let the last callback buffer reach the hardware.
        thread::sleep(Duration::from_millis(100));
        self.stream
            .pause()
            .map_err(|e| PcmError::Device(e.to_string()))?;
        tracing::debug!(
            played_frames = self.played_frames(),
            underrun_frames = self.underrun_frames.load(Ordering::Relaxed),
            "output drained"
        );
        Ok(())
    }
}

/// Convert raw 16-bit PCM bytes to normalized `f32`, appending to `out`.
///
/// The device needs real signed samples, so bytes are read with the
/// conventional meaning of the endianness flag. A byte left over from a
/// previous write is completed by the first byte of this one.
fn bytes_to_f32(carry: &mut Option<u8>, bytes: &[u8], is_big_endian: bool, out: &mut Vec<f32>) {
    let to_f32 = |pair: [u8; 2]| {
        let v = if is_big_endian {
            i16::from_be_bytes(pair)
        } else {
            i16::from_le_bytes(pair)
        };
        f32::from(v) / 32768.0
    };

    let mut rest = bytes;
    if let Some(first) = *carry {
        match rest.split_first() {
            Some((&second, tail)) => {
                out.push(to_f32([first, second]));
                *carry = None;
                rest = tail;
            }
            None => return,
        }
    }

    let mut pairs = rest.chunks_exact(2);
    out.extend(pairs.by_ref().map(|p| to_f32([p[0], p[1]])));
    *carry = pairs.remainder().first().copied();
}

struct CallbackConfig {
    queue: Arc<SampleQueue>,
    refill_max_frames: usize,
    played_frames: Arc<AtomicU64>,
    underrun_frames: Arc<AtomicU64>,
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    cfg: CallbackConfig,
) -> anyhow::Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, cfg),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, cfg),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, cfg),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, cfg),
        other => Err(anyhow::anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    cfg: CallbackConfig,
) -> anyhow::Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let dst_channels = usize::from(config.channels.max(1));
    let mut state = CallbackState {
        src: Vec::new(),
        pos: 0,
        src_channels: cfg.queue.channels(),
    };
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / dst_channels;
            let mut filled = 0usize;

            for frame in 0..frames {
                if state.pos >= state.src.len() {
                    match cfg.queue.pop_frames(cfg.refill_max_frames) {
                        Some(v) => {
                            state.src = v;
                            state.pos = 0;
                        }
                        None => {
                            cfg.underrun_frames
                                .fetch_add((frames - frame) as u64, Ordering::Relaxed);
                            data[frame * dst_channels..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..dst_channels {
                    data[frame * dst_channels + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(state.mapped_sample(dst_channels, ch));
                }
                state.pos += state.src_channels;
                filled += 1;
            }

            if filled > 0 {
                cfg.played_frames.fetch_add(filled as u64, Ordering::Relaxed);
            }
        },
        |err| tracing::warn!("stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

/// Interleaved source frames currently being played by the callback.
struct CallbackState {
    src: Vec<f32>,
    pos: usize,
    src_channels: usize,
}

impl CallbackState {
    /// Sample for output channel `dst_ch` of the frame at `pos`.
    ///
    /// Mono is duplicated, stereo folded to mono is averaged, anything else
    /// clamps to the last available source channel.
    fn mapped_sample(&self, dst_channels: usize, dst_ch: usize) -> f32 {
        let get = |ch: usize| self.src.get(self.pos + ch).copied().unwrap_or(0.0);
        match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (src, _) => get(dst_ch.min(src.saturating_sub(1))),
        }
    }
}
