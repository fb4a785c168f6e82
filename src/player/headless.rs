use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, warn};

use super::traits::{
    ChunkPayload, DecoderBuffer, MediaElement, ReadyState, RegionHandle, TimeRange,
    range_containing,
};
use crate::utils::errors::{StreamError, StreamResult};

/// Decoder buffer and playback clock without an audio device
///
/// Byte ranges map to time linearly (constant bitrate). Each append keeps
/// the buffer in the updating state until a spawned task has "decoded" it,
/// which optionally writes the chunk into a sink file at its byte offset.
#[derive(Clone)]
pub struct HeadlessPlayer {
    inner: Arc<Inner>,
}

struct Inner {
    file_size: u64,
    duration: f64,
    append_latency_ms: AtomicU64,

    ready: watch::Sender<ReadyState>,
    updating: watch::Sender<bool>,
    regions: Mutex<Vec<String>>,
    next_region: AtomicU32,

    /// Half-open `[start, end)` byte spans, merged and sorted
    byte_ranges: RwLock<Vec<(u64, u64)>>,
    appended: Mutex<Vec<u64>>,
    violations: AtomicU64,
    sink: Option<Mutex<File>>,

    position_bits: AtomicU64,
    paused: AtomicBool,
    ended: AtomicBool,
}

impl HeadlessPlayer {
    pub fn new(file_size: u64, duration: f64) -> Self {
        Self::build(file_size, duration, None)
    }

    /// Also write every appended chunk into `path` at its byte offset
    pub async fn with_sink(file_size: u64, duration: f64, path: &Path) -> StreamResult<Self> {
        let file = File::create(path).await.map_err(|e| {
            StreamError::Decoder(format!("Failed to create sink {}: {}", path.display(), e))
        })?;
        Ok(Self::build(file_size, duration, Some(Mutex::new(file))))
    }

    fn build(file_size: u64, duration: f64, sink: Option<Mutex<File>>) -> Self {
        let (ready, _) = watch::channel(ReadyState::Closed);
        let (updating, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                file_size,
                duration,
                append_latency_ms: AtomicU64::new(5),
                ready,
                updating,
                regions: Mutex::new(Vec::new()),
                next_region: AtomicU32::new(0),
                byte_ranges: RwLock::new(Vec::new()),
                appended: Mutex::new(Vec::new()),
                violations: AtomicU64::new(0),
                sink,
                position_bits: AtomicU64::new(0f64.to_bits()),
                paused: AtomicBool::new(true),
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// Set how long each append keeps the buffer updating
    pub fn with_append_latency(self, latency: Duration) -> Self {
        self.inner
            .append_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Signal that the buffer accepts regions
    pub fn open(&self) {
        self.inner.ready.send_replace(ReadyState::Open);
    }

    pub fn close(&self) {
        self.inner.ready.send_replace(ReadyState::Closed);
    }

    /// Appends attempted while a previous one was still being processed
    pub fn violations(&self) -> u64 {
        self.inner.violations.load(Ordering::SeqCst)
    }

    /// Chunk indices in the order their appends completed
    pub async fn appended_chunks(&self) -> Vec<u64> {
        self.inner.appended.lock().await.clone()
    }

    pub fn duration(&self) -> f64 {
        self.inner.duration
    }

    fn set_position(&self, time: f64) {
        self.inner
            .position_bits
            .store(time.to_bits(), Ordering::SeqCst);
    }

    /// Move the playback clock forward by `elapsed` seconds.
    ///
    /// Playback cannot run past the end of the covered range it is in; with
    /// no covered range at the position it stalls in place.
    pub async fn advance(&self, elapsed: f64) -> f64 {
        let position = self.current_time();
        if self.is_paused() || self.is_ended() || !(elapsed > 0.0) {
            return position;
        }

        if position >= self.inner.duration {
            self.finish();
            return position;
        }

        let ranges = self.buffered().await;
        let Some(range) = range_containing(&ranges, position) else {
            return position;
        };

        let next = (position + elapsed).min(range.end).min(self.inner.duration);
        self.set_position(next);

        if next >= self.inner.duration {
            self.finish();
        }

        next
    }

    fn finish(&self) {
        self.inner.ended.store(true, Ordering::SeqCst);
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    /// Playback cannot progress from the current position
    pub async fn is_stalled(&self) -> bool {
        let ranges = self.buffered().await;
        range_containing(&ranges, self.current_time()).is_none() && !self.is_ended()
    }

    fn byte_to_time(&self, byte: u64) -> f64 {
        if self.inner.file_size == 0 {
            return 0.0;
        }
        if byte >= self.inner.file_size {
            return self.inner.duration;
        }
        (byte as f64 * self.inner.duration / self.inner.file_size as f64).min(self.inner.duration)
    }
}

impl Inner {
    async fn complete_append(&self, payload: ChunkPayload) {
        let latency = self.append_latency_ms.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(latency)).await;

        if let Some(sink) = &self.sink {
            let mut file = sink.lock().await;
            let written = async {
                file.seek(std::io::SeekFrom::Start(payload.byte_offset))
                    .await?;
                file.write_all(&payload.bytes).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!("Failed to write chunk {} to sink: {}", payload.chunk_index, e);
            }
        }

        let start = payload.byte_offset;
        let end = start
            .saturating_add(payload.bytes.len() as u64)
            .min(self.file_size.max(start));
        merge_range(&mut *self.byte_ranges.write().await, start, end);
        self.appended.lock().await.push(payload.chunk_index);

        debug!(
            "Decoded chunk {} ({} bytes at {})",
            payload.chunk_index,
            payload.bytes.len(),
            payload.byte_offset
        );
        self.updating.send_replace(false);
    }
}

/// Insert `[start, end)` and coalesce touching or overlapping spans
fn merge_range(ranges: &mut Vec<(u64, u64)>, start: u64, end: u64) {
    if start >= end {
        return;
    }

    ranges.push((start, end));
    ranges.sort_unstable_by_key(|(s, _)| *s);

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for &(s, e) in ranges.iter() {
        match merged.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    *ranges = merged;
}

#[async_trait]
impl DecoderBuffer for HeadlessPlayer {
    fn ready_state(&self) -> ReadyState {
        *self.inner.ready.borrow()
    }

    async fn wait_open(&self) {
        let mut rx = self.inner.ready.subscribe();
        let _ = rx.wait_for(|state| *state == ReadyState::Open).await;
    }

    async fn add_buffer_region(&self, mime_type: &str) -> StreamResult<RegionHandle> {
        if self.ready_state() != ReadyState::Open {
            return Err(StreamError::BufferNotOpen);
        }

        self.inner.regions.lock().await.push(mime_type.to_string());
        let handle = RegionHandle(self.inner.next_region.fetch_add(1, Ordering::SeqCst));
        debug!("Added buffer region {:?} ({})", handle, mime_type);
        Ok(handle)
    }

    fn is_updating(&self) -> bool {
        *self.inner.updating.borrow()
    }

    async fn wait_idle(&self) {
        let mut rx = self.inner.updating.subscribe();
        let _ = rx.wait_for(|updating| !*updating).await;
    }

    async fn append_bytes(&self, region: RegionHandle, payload: ChunkPayload) -> StreamResult<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(StreamError::BufferNotOpen);
        }
        if region.0 >= self.inner.next_region.load(Ordering::SeqCst) {
            return Err(StreamError::Decoder(format!("Unknown buffer region {:?}", region)));
        }

        // Claim the updating flag; losing the race means an overlapping append
        let claimed = self.inner.updating.send_if_modified(|updating| {
            if *updating {
                false
            } else {
                *updating = true;
                true
            }
        });
        if !claimed {
            self.inner.violations.fetch_add(1, Ordering::SeqCst);
            return Err(StreamError::Decoder(format!(
                "Append of chunk {} while the buffer is updating",
                payload.chunk_index
            )));
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.complete_append(payload).await;
        });

        Ok(())
    }

    async fn buffered(&self) -> Vec<TimeRange> {
        self.inner
            .byte_ranges
            .read()
            .await
            .iter()
            .map(|&(start, end)| TimeRange::new(self.byte_to_time(start), self.byte_to_time(end)))
            .collect()
    }
}

#[async_trait]
impl MediaElement for HeadlessPlayer {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.inner.position_bits.load(Ordering::SeqCst))
    }

    async fn set_current_time(&self, time: f64) {
        let clamped = if time.is_finite() {
            time.clamp(0.0, self.inner.duration.max(0.0))
        } else {
            0.0
        };
        self.set_position(clamped);
        self.inner.ended.store(false, Ordering::SeqCst);
    }

    async fn play(&self) -> StreamResult<()> {
        self.inner.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }
}
