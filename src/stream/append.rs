use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::chunk::{chunk_byte_range, chunk_start_byte};
use super::ledger::ChunkLedger;
use super::range_fetcher::ChunkSource;
use super::retry::RetryPolicy;
use super::stats::StreamStats;
use crate::models::Song;
use crate::player::{ChunkPayload, DecoderBuffer, ReadyState, RegionHandle};
use crate::utils::errors::{StreamError, StreamResult};

/// Serializes appends into the decoder buffer and keeps the ledger
///
/// The ledger mutex doubles as the append lock: it is held from the idle
/// wait until the append call returns, so two appends are never issued
/// concurrently regardless of which path fetched the bytes.
pub struct AppendCoordinator {
    decoder: Arc<dyn DecoderBuffer>,
    source: Arc<dyn ChunkSource>,
    ledger: Mutex<ChunkLedger>,
    chunk_size: u64,
    retry: RetryPolicy,
    stats: StreamStats,
}

impl AppendCoordinator {
    pub fn new(
        decoder: Arc<dyn DecoderBuffer>,
        source: Arc<dyn ChunkSource>,
        chunk_size: u64,
        retry: RetryPolicy,
        stats: StreamStats,
    ) -> Self {
        Self {
            decoder,
            source,
            ledger: Mutex::new(ChunkLedger::new()),
            chunk_size,
            retry,
            stats,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Snapshot of the ledger
    pub async fn ledger(&self) -> ChunkLedger {
        self.ledger.lock().await.clone()
    }

    /// Hand `bytes` for `chunk_index` to the decoder, then record it.
    pub async fn append(
        &self,
        region: RegionHandle,
        chunk_index: u64,
        bytes: Bytes,
    ) -> StreamResult<()> {
        let mut ledger = self.ledger.lock().await;

        if self.decoder.ready_state() != ReadyState::Open {
            return Err(StreamError::BufferNotOpen);
        }

        // The decoder may still be consuming an earlier append
        self.decoder.wait_idle().await;

        let len = bytes.len();
        self.decoder
            .append_bytes(
                region,
                ChunkPayload {
                    chunk_index,
                    byte_offset: chunk_start_byte(chunk_index, self.chunk_size),
                    bytes,
                },
            )
            .await?;

        ledger.record(chunk_index);
        self.stats.increment_appended();
        debug!("Appended chunk {} ({} bytes)", chunk_index, len);
        Ok(())
    }

    /// Fetch one chunk and append it, retrying transient failures.
    ///
    /// `still_current` is checked before every attempt; once it returns
    /// false the operation stops with `Superseded`. Absence of any server
    /// is surfaced immediately. Transient failures that outlast the retry
    /// policy become `RetriesExhausted`.
    pub async fn fetch_and_append<F>(
        &self,
        song: &Song,
        region: RegionHandle,
        chunk_index: u64,
        still_current: F,
    ) -> StreamResult<()>
    where
        F: Fn() -> bool + Send + Sync,
    {
        let (start, end) = chunk_byte_range(chunk_index, self.chunk_size);
        let operation = format!("chunk {}", chunk_index);

        let source = &self.source;
        let stats = &self.stats;
        let still_current = &still_current;

        let fetched = self
            .retry
            .execute(&operation, |attempt| async move {
                if !still_current() {
                    return Err(StreamError::Superseded);
                }
                if attempt > 0 {
                    stats.increment_retry();
                }
                source.fetch_range(song, start, end).await
            })
            .await;

        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(StreamError::Superseded) => {
                info!("Chunk {} superseded by a seek", chunk_index);
                return Err(StreamError::Superseded);
            }
            Err(e) if e.is_retryable() => {
                self.stats.increment_failure();
                error!(
                    "Giving up on chunk {} after {} attempts: {}",
                    chunk_index,
                    self.retry.total_attempts(),
                    e
                );
                return Err(StreamError::RetriesExhausted {
                    chunk_index,
                    attempts: self.retry.total_attempts(),
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                self.stats.increment_failure();
                error!("Chunk {} failed: {}", chunk_index, e);
                return Err(e);
            }
        };

        self.append(region, chunk_index, bytes).await
    }
}
