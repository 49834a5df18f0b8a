/// Smallest chunk that still holds one sample pair.
const MIN_CHUNK_BYTES: usize = 2;

/// Decoder tuning.
#[derive(Clone, Debug)]
pub struct DecodeConfig {
    /// Bytes requested from the source per pull.
    pub chunk_bytes: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { chunk_bytes: 8192 }
    }
}

impl DecodeConfig {
    /// Chunk size clamped to at least one sample pair.
    pub fn effective_chunk_bytes(&self) -> usize {
        self.chunk_bytes.max(MIN_CHUNK_BYTES)
    }
}

/// Playback tuning shared by the copy loop and the device output.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Bytes copied from the source to the device per iteration.
    pub chunk_bytes: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for queue sizing.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_bytes: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}

impl PlaybackConfig {
    pub fn effective_chunk_bytes(&self) -> usize {
        self.chunk_bytes.max(MIN_CHUNK_BYTES)
    }
}
