use super::chunk::DEFAULT_CHUNK_SIZE;
use super::range_fetcher::StreamAddressing;
use super::retry::RetryPolicy;

/// Engine-facing settings for one playback session
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    /// Chunk size in bytes
    pub chunk_size: u64,

    /// Remaining buffered seconds below which the next chunk is prefetched
    pub low_water_mark_secs: f64,

    /// MIME type handed to the decoder when the buffer region is created
    pub mime_type: String,

    pub addressing: StreamAddressing,

    /// Bitrate assumed when a song arrives without a duration
    pub fallback_bitrate_kbps: u32,

    /// Backoff for chunk fetches that fail transiently
    pub retry: RetryPolicy,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            low_water_mark_secs: 5.0,
            mime_type: "audio/mpeg".to_string(),
            addressing: StreamAddressing::default(),
            fallback_bitrate_kbps: 128,
            retry: RetryPolicy::default(),
        }
    }
}
