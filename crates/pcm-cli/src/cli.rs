use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pcm-cli", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect the container and print its format
    Info {
        /// Path to a 16-bit PCM file (WAV, AIFF, ...)
        path: PathBuf,
    },

    /// Print one sample value per line
    Decode {
        path: PathBuf,

        /// Stop after this many samples
        #[arg(long)]
        limit: Option<u64>,

        /// Bytes read from the source per pull
        #[arg(long, default_value_t = 8192)]
        chunk_bytes: usize,
    },

    /// Play the file on an output device
    Play {
        path: PathBuf,

        /// Use a specific output device by substring match
        #[arg(long)]
        device: Option<String>,

        /// Bytes copied to the device per write
        #[arg(long, default_value_t = 1024)]
        chunk_bytes: usize,

        /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
        #[arg(long, default_value_t = 4096)]
        refill_max_frames: usize,

        /// Output queue depth in seconds
        #[arg(long, default_value_t = 2.0)]
        buffer_seconds: f32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_defaults_match_library_defaults() {
        let args = Args::try_parse_from(["pcm-cli", "play", "a.wav"]).unwrap();
        match args.cmd {
            Some(Command::Play {
                chunk_bytes,
                refill_max_frames,
                buffer_seconds,
                device,
                ..
            }) => {
                let lib = pcm_stream::config::PlaybackConfig::default();
                assert_eq!(chunk_bytes, lib.chunk_bytes);
                assert_eq!(refill_max_frames, lib.refill_max_frames);
                assert_eq!(buffer_seconds, lib.buffer_seconds);
                assert!(device.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn decode_accepts_limit_and_chunk_size() {
        let args =
            Args::try_parse_from(["pcm-cli", "decode", "a.aiff", "--limit", "10", "--chunk-bytes", "64"])
                .unwrap();
        match args.cmd {
            Some(Command::Decode {
                limit, chunk_bytes, ..
            }) => {
                assert_eq!(limit, Some(10));
                assert_eq!(chunk_bytes, 64);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::try_parse_from(["pcm-cli", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }
}
