//! Lazy, cancellable decoding of 16-bit PCM streams into sample values, plus
//! blocking playback of the same streams through an output device.
//!
//! The decode path is [`decode::StreamDecoder`] (raw bytes with a known
//! format) and [`decode::decode`] (self-describing container, detected on the
//! first pull). Playback lives in [`playback`].

pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod format;
pub mod playback;
pub mod probe;
pub mod queue;

pub use decode::{CancelHandle, SampleStream, SessionStatus, StreamDecoder, decode, decode_all};
pub use error::{PcmError, Result};
pub use format::{AudioFormatDescriptor, FormatMetrics};
pub use playback::{OutputDevice, PlaybackReport, PlaybackSink};
