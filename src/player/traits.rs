use async_trait::async_trait;
use bytes::Bytes;

use crate::utils::errors::StreamResult;

/// A playable span of the decoder buffer, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Half-open: `[start, end)`
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// The covered range holding `time`, if any
pub fn range_containing(ranges: &[TimeRange], time: f64) -> Option<TimeRange> {
    ranges.iter().copied().find(|range| range.contains(time))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Closed,
    Open,
}

/// One fetched chunk on its way into the decoder
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub chunk_index: u64,
    /// Offset of the first byte within the song file
    pub byte_offset: u64,
    pub bytes: Bytes,
}

/// Platform media-decoding sink accepting appended byte ranges
///
/// Appends complete asynchronously: `is_updating` stays true until the
/// decoder has consumed the bytes, and appending in that window fails.
#[async_trait]
pub trait DecoderBuffer: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Resolves once the buffer can accept a region
    async fn wait_open(&self);

    async fn add_buffer_region(&self, mime_type: &str) -> StreamResult<RegionHandle>;

    fn is_updating(&self) -> bool;

    /// Resolves once no append is being processed
    async fn wait_idle(&self);

    async fn append_bytes(&self, region: RegionHandle, payload: ChunkPayload) -> StreamResult<()>;

    /// Covered time ranges, sorted and non-overlapping
    async fn buffered(&self) -> Vec<TimeRange>;
}

#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Playback position in seconds
    fn current_time(&self) -> f64;
    async fn set_current_time(&self, time: f64);
    async fn play(&self) -> StreamResult<()>;
    async fn pause(&self);
    fn is_paused(&self) -> bool;
    fn is_ended(&self) -> bool;
}
