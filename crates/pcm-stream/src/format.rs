//! PCM format description and 16-bit sample pairing.
//!
//! [`AudioFormatDescriptor`] is what detection hands to the decoder: it carries
//! everything needed to turn raw bytes into sample values plus a few derived
//! metrics that are reported once per session for diagnostics.

/// Bit depth the pairing algorithm understands.
pub const SUPPORTED_BITS_PER_SAMPLE: u16 = 16;

/// Immutable description of a raw PCM byte stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioFormatDescriptor {
    /// Samples per second per channel.
    pub sample_rate: f32,
    /// Frames per second (equal to `sample_rate` for linear PCM).
    pub frame_rate: f32,
    /// Total frames in the stream, `None` when the container does not say.
    pub frame_length: Option<u64>,
    /// Byte-order flag reported by the container.
    pub is_big_endian: bool,
    /// Bits per sample; only 16 is decodable.
    pub bits_per_sample: u16,
    /// Interleaved channel count.
    pub channels: u16,
}

/// Descriptive metrics derived from a format. They never gate decoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormatMetrics {
    /// Stream length in seconds (`frame_length / frame_rate`).
    pub duration_seconds: f32,
    /// Number of equidistant points, `floor(duration * sample_rate) / 2`.
    pub sample_count: u64,
    /// Spacing between equidistant points, `duration / sample_count`.
    pub interval_seconds: f32,
}

impl AudioFormatDescriptor {
    /// Descriptor for a 16-bit stream where frame rate equals sample rate.
    pub fn pcm16(sample_rate: u32, channels: u16, is_big_endian: bool) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            frame_rate: sample_rate as f32,
            frame_length: None,
            is_big_endian,
            bits_per_sample: SUPPORTED_BITS_PER_SAMPLE,
            channels,
        }
    }

    pub fn with_frame_length(mut self, frames: u64) -> Self {
        self.frame_length = Some(frames);
        self
    }

    /// Bytes per interleaved frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels.max(1))
    }

    /// Derived diagnostic metrics.
    ///
    /// Returns `None` when the frame length is unknown or the frame rate is not
    /// positive. `interval_seconds` is infinite when the point count is zero.
    pub fn metrics(&self) -> Option<FormatMetrics> {
        let frames = self.frame_length?;
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return None;
        }
        let duration_seconds = frames as f32 / self.frame_rate;
        let sample_count = ((duration_seconds * self.sample_rate) as u64) / 2;
        let interval_seconds = duration_seconds / sample_count as f32;
        Some(FormatMetrics {
            duration_seconds,
            sample_count,
            interval_seconds,
        })
    }
}

/// Combine two raw bytes into one sample value.
///
/// The flag keeps the container's literal branch semantics: when
/// `is_big_endian` is false the first byte is the high byte, when it is true
/// the second byte is.
#[inline]
pub fn pair_to_sample(b1: u8, b2: u8, is_big_endian: bool) -> u16 {
    let (b1, b2) = (u16::from(b1), u16::from(b2));
    if is_big_endian {
        b1 + (b2 << 8)
    } else {
        (b1 << 8) + b2
    }
}

/// Inverse of [`pair_to_sample`].
#[inline]
pub fn sample_to_pair(value: u16, is_big_endian: bool) -> [u8; 2] {
    let hi = (value >> 8) as u8;
    let lo = (value & 0xff) as u8;
    if is_big_endian { [lo, hi] } else { [hi, lo] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_to_sample_little_flag_puts_first_byte_high() {
        assert_eq!(pair_to_sample(0x12, 0x34, false), 0x1234);
    }

    #[test]
    fn pair_to_sample_big_flag_puts_second_byte_high() {
        assert_eq!(pair_to_sample(0x12, 0x34, true), 0x3412);
    }

    #[test]
    fn pair_to_sample_treats_bytes_as_unsigned() {
        assert_eq!(pair_to_sample(0xff, 0x00, false), 0xff00);
        assert_eq!(pair_to_sample(0x00, 0xff, false), 255);
        assert_eq!(pair_to_sample(0xff, 0xff, true), 65535);
    }

    #[test]
    fn sample_to_pair_inverts_both_flags() {
        for flag in [false, true] {
            for value in [0u16, 1, 255, 256, 0x7fff, 0x8000, 0xabcd, u16::MAX] {
                let [b1, b2] = sample_to_pair(value, flag);
                assert_eq!(pair_to_sample(b1, b2, flag), value);
            }
        }
    }

    #[test]
    fn metrics_match_reference_formula() {
        let format = AudioFormatDescriptor::pcm16(44_100, 2, false).with_frame_length(88_200);
        let m = format.metrics().unwrap();
        assert_eq!(m.duration_seconds, 2.0);
        assert_eq!(m.sample_count, 44_100);
        assert!((m.interval_seconds - 2.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_floor_odd_point_count() {
        let format = AudioFormatDescriptor::pcm16(8_000, 1, false).with_frame_length(3);
        let m = format.metrics().unwrap();
        assert_eq!(m.sample_count, 1);
    }

    #[test]
    fn metrics_absent_without_frame_length() {
        let format = AudioFormatDescriptor::pcm16(48_000, 2, false);
        assert!(format.metrics().is_none());
    }

    #[test]
    fn metrics_absent_for_zero_frame_rate() {
        let mut format = AudioFormatDescriptor::pcm16(48_000, 2, false).with_frame_length(10);
        format.frame_rate = 0.0;
        assert!(format.metrics().is_none());
    }

    #[test]
    fn frame_bytes_counts_all_channels() {
        assert_eq!(AudioFormatDescriptor::pcm16(48_000, 2, false).frame_bytes(), 4);
        assert_eq!(AudioFormatDescriptor::pcm16(48_000, 1, true).frame_bytes(), 2);
    }
}
