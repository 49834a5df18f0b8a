//! `pcm-cli`: inspect, decode, or play 16-bit PCM files.
//!
//! - `info` prints the detected format and its derived metrics.
//! - `decode` streams sample values to stdout; Ctrl-C or `--limit` stop it
//!   cooperatively through the decoder's cancel handle.
//! - `play` sends the raw stream to an output device and blocks until done.

mod cli;

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use pcm_stream::config::{DecodeConfig, PlaybackConfig};
use pcm_stream::probe::probe_file;
use pcm_stream::{SessionStatus, StreamDecoder};
use symphonia::core::probe::Hint;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pcm_stream=info")),
        )
        .init();

    if args.list_devices {
        pcm_stream::device::list_devices(&cpal::default_host())?;
        return Ok(());
    }

    match args.cmd {
        Some(cli::Command::Info { path }) => info(&path),
        Some(cli::Command::Decode {
            path,
            limit,
            chunk_bytes,
        }) => decode(&path, limit, DecodeConfig { chunk_bytes }),
        Some(cli::Command::Play {
            path,
            device,
            chunk_bytes,
            refill_max_frames,
            buffer_seconds,
        }) => play(
            &path,
            device.as_deref(),
            PlaybackConfig {
                chunk_bytes,
                refill_max_frames,
                buffer_seconds,
            },
        ),
        None => {
            anyhow::bail!("no command given (try `pcm-cli --help`)");
        }
    }
}

fn info(path: &Path) -> Result<()> {
    let probed = probe_file(path).with_context(|| format!("probe {path:?}"))?;
    let format = probed.format();

    println!("codec         = {}", probed.codec().unwrap_or("unknown"));
    println!("sample rate   = {}", format.sample_rate);
    println!("channels      = {}", format.channels);
    println!("big endian    = {}", format.is_big_endian);
    match format.metrics() {
        Some(m) => {
            println!("T             = {} (length of sampled sound in seconds)", m.duration_seconds);
            println!("n             = {} (number of equidistant points)", m.sample_count);
            println!("h             = {} (length of each time interval in seconds)", m.interval_seconds);
        }
        None => println!("length        = unknown"),
    }
    Ok(())
}

fn decode(path: &Path, limit: Option<u64>, config: DecodeConfig) -> Result<()> {
    let probed = probe_file(path).with_context(|| format!("probe {path:?}"))?;
    let format = probed.format();
    let mut decoder = StreamDecoder::with_config(probed, format, &config)?;

    let cancel = decoder.cancel_handle();
    ctrlc::set_handler(move || cancel.cancel()).context("install Ctrl-C handler")?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_samples(&mut decoder, limit, &mut out).with_context(|| format!("decode {path:?}"))?;
    out.flush()?;

    if decoder.status() == SessionStatus::Cancelled {
        tracing::info!(samples = decoder.samples_emitted(), "decode cancelled");
    }
    Ok(())
}

/// Print one value per line until the stream ends or `limit` values are out.
///
/// The limit is checked before each pull, so reaching it cancels the session
/// without reading further.
fn write_samples<R: Read, W: Write>(
    decoder: &mut StreamDecoder<R>,
    limit: Option<u64>,
    out: &mut W,
) -> Result<()> {
    loop {
        if limit.is_some_and(|n| decoder.samples_emitted() >= n) {
            decoder.cancel();
        }
        let Some(value) = decoder.next() else {
            return Ok(());
        };
        writeln!(out, "{}", value?)?;
    }
}

fn play(path: &Path, device: Option<&str>, config: PlaybackConfig) -> Result<()> {
    let file = File::open(path).with_context(|| format!("open {path:?}"))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    tracing::info!(path = ?path, "playing");
    let report = pcm_stream::playback::play(Box::new(file), hint, device, &config)?;
    tracing::debug!(bytes = report.bytes_written, "playback finished");
    Ok(())
}
