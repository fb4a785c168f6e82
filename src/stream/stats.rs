use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one playback session
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Range requests issued (every endpoint attempt counts)
    pub chunks_requested: Arc<AtomicU64>,
    /// Chunks handed to the decoder buffer
    pub chunks_appended: Arc<AtomicU64>,
    /// Payload bytes received
    pub bytes_received: Arc<AtomicU64>,
    /// Range fetches answered by an alternate endpoint
    pub failovers: Arc<AtomicU64>,
    /// Fetch-and-append retries after a transient failure
    pub retries: Arc<AtomicU64>,
    /// Fetch-and-append operations that gave up
    pub failures: Arc<AtomicU64>,
    pub seeks: Arc<AtomicU64>,
    /// Monitor ticks dropped because a fetch was already in flight
    pub skipped_ticks: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            chunks_requested: Arc::new(AtomicU64::new(0)),
            chunks_appended: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            failovers: Arc::new(AtomicU64::new(0)),
            retries: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            seeks: Arc::new(AtomicU64::new(0)),
            skipped_ticks: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn increment_requested(&self) {
        self.chunks_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_appended(&self) {
        self.chunks_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_seek(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn format_report(&self) -> String {
        let uptime_secs = self.start_time.elapsed().as_secs();
        let minutes = uptime_secs / 60;
        let seconds = uptime_secs % 60;

        let total_mb = self.bytes_received.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0);

        let mut report = format!(
            "📊 Stream Stats [{}m {}s] | Requested: {} | Appended: {} | Received: {:.1} MB | Seeks: {}",
            minutes,
            seconds,
            self.chunks_requested.load(Ordering::Relaxed),
            self.chunks_appended.load(Ordering::Relaxed),
            total_mb,
            self.seeks.load(Ordering::Relaxed),
        );

        let failovers = self.failovers.load(Ordering::Relaxed);
        let retries = self.retries.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let skipped = self.skipped_ticks.load(Ordering::Relaxed);

        if failovers > 0 || retries > 0 || failures > 0 {
            report.push_str(&format!(
                "\n   Failovers: {} | Retries: {} | Failures: {}",
                failovers, retries, failures
            ));
        }

        if skipped > 0 {
            report.push_str(&format!("\n   Ticks skipped while busy: {}", skipped));
        }

        report
    }
}
