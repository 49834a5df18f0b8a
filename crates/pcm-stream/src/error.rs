//! Error taxonomy for the decode and playback paths.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PcmError {
    /// The input header could not be parsed into a format descriptor.
    #[error("format detection failed: {0}")]
    FormatDetection(String),
    /// A read from the byte source failed mid-stream.
    #[error("source read failed: {0}")]
    SourceRead(#[source] std::io::Error),
    /// The stream is valid but not something the decoder handles.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// No usable output device could be opened.
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The device rejected a write or failed to drain.
    #[error("output device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, PcmError>;

/// Container errors raised while probing are detection failures, including
/// "no suitable format reader" for input that is not audio at all.
impl From<symphonia::core::errors::Error> for PcmError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        PcmError::FormatDetection(err.to_string())
    }
}
