#![cfg(test)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::Song;
use crate::stream::range_fetcher::ChunkSource;
use crate::utils::errors::{StreamError, StreamResult};

/// In-memory song file with scripted failures
pub struct ScriptedSource {
    size: u64,
    delay: Duration,
    failures: Mutex<VecDeque<StreamError>>,
    calls: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedSource {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            delay: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue errors returned by the next fetches, in order
    pub fn failing_with(self, errors: impl IntoIterator<Item = StreamError>) -> Self {
        self.failures.lock().unwrap().extend(errors);
        self
    }

    /// Queue errors for fetches that have not happened yet
    pub fn fail_next(&self, errors: impl IntoIterator<Item = StreamError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    /// Requested ranges, in request order
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn fetch_range(&self, _song: &Song, start: u64, end: u64) -> StreamResult<Bytes> {
        self.calls.lock().unwrap().push((start, end));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        if start >= self.size {
            return Err(StreamError::Status {
                status: 416,
                url: "memory".to_string(),
            });
        }

        let end = end.min(self.size - 1);
        Ok(Bytes::from(vec![(start % 251) as u8; (end - start + 1) as usize]))
    }

    async fn content_length(&self, _song: &Song) -> StreamResult<u64> {
        Ok(self.size)
    }
}

pub fn test_song(duration: f64, size: u64) -> Song {
    serde_json::from_value(json!({
        "id": 1,
        "title": "Song",
        "artist": "Band",
        "duration": duration,
        "size": size
    }))
    .unwrap()
}

/// Common test utilities
pub mod common {
    use std::future::Future;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Wait for an async condition to become true
    pub async fn wait_for_async<F, Fut>(mut condition: F, max_wait: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < max_wait {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(5)).await;
        }

        condition().await
    }
}
