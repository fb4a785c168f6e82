use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::append::AppendCoordinator;
use super::chunk::chunk_index_for;
use super::config::StreamingSettings;
use super::ledger::ChunkLedger;
use super::monitor::{BufferMonitor, FetchReason, TickAction};
use super::range_fetcher::ChunkSource;
use super::stats::StreamStats;
use super::status::{PlaybackStatus, StatusPublisher};
use crate::models::Song;
use crate::player::{DecoderBuffer, MediaElement, ReadyState, RegionHandle, range_containing};
use crate::utils::errors::{StreamError, StreamResult};

/// Remaining seconds at which a covered range counts as run dry
const STALL_EPSILON: f64 = 0.05;

/// Signals delivered to a running session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    /// The decoder reported a new playback position
    TimeUpdate,
    Seek(f64),
    Play,
    Pause,
}

/// Playback of one song into one decoder buffer
///
/// Owns the ledger, the Streamer Node Set (through its chunk source) and the
/// decoder pair. Switching songs means dropping the session and opening a new
/// one; nothing here is reset in place.
pub struct PlaybackSession {
    song: Song,
    decoder: Arc<dyn DecoderBuffer>,
    media: Arc<dyn MediaElement>,
    coordinator: AppendCoordinator,
    monitor: BufferMonitor,
    mime_type: String,
    region: OnceCell<RegionHandle>,
    seek_epoch: AtomicU64,
    active_seeks: AtomicUsize,
    closed: AtomicBool,
    failure: OnceCell<StreamError>,
    status: StatusPublisher,
    stats: StreamStats,
}

/// Marks a seek as running for as long as it lives
struct ActiveSeek<'a>(&'a AtomicUsize);

impl<'a> ActiveSeek<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveSeek<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PlaybackSession {
    pub fn new(
        song: Song,
        source: Arc<dyn ChunkSource>,
        decoder: Arc<dyn DecoderBuffer>,
        media: Arc<dyn MediaElement>,
        settings: &StreamingSettings,
        stats: StreamStats,
    ) -> StreamResult<Self> {
        if !song.is_streamable() {
            return Err(StreamError::InvalidSong(format!(
                "{} needs a positive duration and size (duration={}, size={})",
                song.composite_key(),
                song.duration,
                song.size
            )));
        }
        if settings.chunk_size == 0 {
            return Err(StreamError::Configuration(
                "chunk size must be greater than 0".to_string(),
            ));
        }

        let coordinator = AppendCoordinator::new(
            Arc::clone(&decoder),
            source,
            settings.chunk_size,
            settings.retry.clone(),
            stats.clone(),
        );

        Ok(Self {
            song,
            decoder,
            media,
            coordinator,
            monitor: BufferMonitor::new(settings.low_water_mark_secs, settings.chunk_size),
            mime_type: settings.mime_type.clone(),
            region: OnceCell::new(),
            seek_epoch: AtomicU64::new(0),
            active_seeks: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            failure: OnceCell::new(),
            status: StatusPublisher::new(),
            stats,
        })
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.subscribe()
    }

    pub async fn ledger(&self) -> ChunkLedger {
        self.coordinator.ledger().await
    }

    fn fail(&self, err: &StreamError) {
        error!("Playback of {} failed: {}", self.song.composite_key(), err);
        let _ = self.failure.set(err.clone());
        self.status.set(PlaybackStatus::Failed(err.to_string()));
    }

    fn is_stopped(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.status.current().is_failed()
    }

    /// Wait for the decoder to open, create the region and fetch chunk 0
    pub async fn start(&self) -> StreamResult<()> {
        if self.region.initialized() {
            return Ok(());
        }

        self.status.set(PlaybackStatus::Loading);
        self.decoder.wait_open().await;

        let region = self.decoder.add_buffer_region(&self.mime_type).await?;
        if self.region.set(region).is_err() {
            return Ok(());
        }
        info!(
            "Streaming {} ({} bytes, {:.1}s)",
            self.song.label(),
            self.song.size,
            self.song.duration
        );

        // Ticks arriving during the bootstrap fetch are skipped
        let _guard = self.monitor.try_begin();
        debug!("Fetching chunk 0 ({:?})", FetchReason::Bootstrap);

        if let Err(e) = self
            .coordinator
            .fetch_and_append(&self.song, region, 0, || true)
            .await
        {
            self.fail(&e);
            return Err(e);
        }

        self.refresh_status().await;
        Ok(())
    }

    /// One Buffer Monitor tick.
    ///
    /// Returns the action taken; skipped ticks report `Idle`. Only terminal
    /// failures are returned as errors; anything else is retried on a later
    /// tick.
    pub async fn on_time_update(&self) -> StreamResult<TickAction> {
        if self.is_stopped() {
            return Ok(TickAction::Idle);
        }
        let Some(&region) = self.region.get() else {
            return Ok(TickAction::Idle);
        };
        if self.decoder.ready_state() != ReadyState::Open {
            debug!("Decoder buffer not open, skipping tick");
            return Ok(TickAction::Idle);
        }
        if self.active_seeks.load(Ordering::Acquire) > 0 {
            self.stats.increment_skipped_tick();
            return Ok(TickAction::Idle);
        }

        let Some(_guard) = self.monitor.try_begin() else {
            self.stats.increment_skipped_tick();
            return Ok(TickAction::Idle);
        };

        let position = self.media.current_time();
        let buffered = self.decoder.buffered().await;
        let ledger = self.coordinator.ledger().await;
        let action = self.monitor.evaluate(position, &buffered, &ledger, &self.song);

        self.refresh_status().await;

        if let TickAction::Fetch {
            chunk_index,
            reason,
        } = action
        {
            debug!("Tick at {:.2}s: chunk {} ({:?})", position, chunk_index, reason);

            let epoch = self.seek_epoch.load(Ordering::Acquire);
            let result = self
                .coordinator
                .fetch_and_append(&self.song, region, chunk_index, || {
                    self.seek_epoch.load(Ordering::Acquire) == epoch
                })
                .await;

            match result {
                Ok(()) => {}
                Err(StreamError::Superseded) | Err(StreamError::BufferNotOpen) => {
                    debug!("Tick fetch of chunk {} dropped", chunk_index);
                }
                Err(e) if e.is_terminal() => {
                    self.fail(&e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Chunk {} not appended, retrying next tick: {}", chunk_index, e);
                }
            }

            self.refresh_status().await;
        }

        Ok(action)
    }

    /// Seek to `time` seconds.
    ///
    /// Supersedes any pending prefetch: the monitor's retries stop at their
    /// next attempt and ticks are skipped until the seek finishes. An
    /// uncovered target is fetched once before the position moves.
    pub async fn seek(&self, time: f64) -> StreamResult<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let Some(&region) = self.region.get() else {
            return Err(StreamError::BufferNotOpen);
        };

        let target = if time.is_finite() {
            time.clamp(0.0, self.song.duration)
        } else {
            0.0
        };

        let active = ActiveSeek::enter(&self.active_seeks);
        let epoch = self.seek_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.increment_seek();

        self.media.pause().await;
        self.status.set(PlaybackStatus::Seeking);

        let buffered = self.decoder.buffered().await;
        if range_containing(&buffered, target).is_none() {
            let chunk_index = chunk_index_for(
                target,
                self.song.duration,
                self.song.size,
                self.coordinator.chunk_size(),
            );
            info!(
                "Seek to {:.2}s needs chunk {} ({:?})",
                target,
                chunk_index,
                FetchReason::Seek
            );

            let result = self
                .coordinator
                .fetch_and_append(&self.song, region, chunk_index, || {
                    self.seek_epoch.load(Ordering::Acquire) == epoch
                })
                .await;

            match result {
                // Let the decoder finish so the target is covered before resuming
                Ok(()) => self.decoder.wait_idle().await,
                Err(StreamError::Superseded) => return Ok(()),
                Err(e) if e.is_terminal() => {
                    self.fail(&e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Seek fetch of chunk {} failed: {}", chunk_index, e);
                }
            }
        } else {
            debug!("Seek to {:.2}s is already buffered", target);
        }

        if self.seek_epoch.load(Ordering::Acquire) != epoch {
            debug!("Seek to {:.2}s superseded", target);
            return Ok(());
        }

        self.media.set_current_time(target).await;
        self.media.play().await?;
        drop(active);

        self.refresh_status().await;
        Ok(())
    }

    pub async fn play(&self) -> StreamResult<()> {
        if self.is_stopped() {
            return Ok(());
        }
        self.media.play().await?;
        self.refresh_status().await;
        Ok(())
    }

    pub async fn pause(&self) {
        self.media.pause().await;
        self.refresh_status().await;
    }

    /// Derive the visible status from the media element and the buffer
    async fn refresh_status(&self) {
        if self.is_stopped() || self.active_seeks.load(Ordering::Acquire) > 0 {
            return;
        }

        if self.media.is_ended() {
            self.status.set(PlaybackStatus::Ended);
            return;
        }
        if self.media.is_paused() {
            self.status.set(PlaybackStatus::Paused);
            return;
        }

        let position = self.media.current_time();
        let buffered = self.decoder.buffered().await;
        let stalled = match range_containing(&buffered, position) {
            None => true,
            Some(range) => {
                range.end - position <= STALL_EPSILON
                    && range.end < self.song.duration - STALL_EPSILON
            }
        };

        self.status.set(if stalled {
            PlaybackStatus::Buffering
        } else {
            PlaybackStatus::Playing
        });
    }

    /// Drive the session from `events` until cancelled, the channel closes
    /// or playback fails.
    ///
    /// Ticks and seeks run as separate tasks so a seek never queues behind
    /// an in-flight prefetch.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) -> StreamResult<()> {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut status_rx = self.status.subscribe();

        loop {
            while tasks.try_join_next().is_some() {}
            if self.is_stopped() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session for {} cancelled", self.song.composite_key());
                    break;
                }
                changed = status_rx.changed() => {
                    if changed.is_err() || status_rx.borrow_and_update().is_failed() {
                        break;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let session = Arc::clone(&self);
                    match event {
                        SessionEvent::TimeUpdate => {
                            tasks.spawn(async move {
                                let _ = session.on_time_update().await;
                            });
                        }
                        SessionEvent::Seek(time) => {
                            tasks.spawn(async move {
                                if let Err(e) = session.seek(time).await {
                                    warn!("Seek to {:.2}s failed: {}", time, e);
                                }
                            });
                        }
                        SessionEvent::Play => {
                            if let Err(e) = session.play().await {
                                warn!("Play failed: {}", e);
                            }
                        }
                        SessionEvent::Pause => session.pause().await,
                    }
                }
            }
        }

        tasks.shutdown().await;

        match self.failure.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// The terminal error, once playback has failed
    pub fn failure(&self) -> Option<&StreamError> {
        self.failure.get()
    }

    /// Stop fetching and pause; the decoder pair is dropped with the session
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.seek_epoch.fetch_add(1, Ordering::AcqRel);
        self.media.pause().await;
        info!("{}", self.stats.format_report());
    }
}
