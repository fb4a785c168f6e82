use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::config::StreamingSettings;
use super::range_fetcher::{ChunkSource, RangeFetcher};
use super::session::PlaybackSession;
use super::stats::StreamStats;
use crate::config::Config;
use crate::models::Song;
use crate::player::{DecoderBuffer, MediaElement};
use crate::services::catalog::CatalogClient;
use crate::services::directory::ServerDirectory;
use crate::utils::errors::{StreamError, StreamResult};

/// Entry point of the engine: one directory, many sessions
pub struct Streamer {
    directory: Arc<ServerDirectory>,
    settings: StreamingSettings,
}

impl Streamer {
    pub fn new(directory: Arc<ServerDirectory>, settings: StreamingSettings) -> Self {
        Self {
            directory,
            settings,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let directory = ServerDirectory::new(config.endpoints()?)
            .with_strategy(config.discovery.strategy)
            .with_probe_path(config.network.probe_path.clone())
            .with_probe_timeout(config.probe_timeout())
            .with_streamer_port(config.discovery.streamer_port);

        debug!(
            "Streamer configured with {} servers ({:?} resolution)",
            directory.candidates().len(),
            directory.strategy()
        );

        Ok(Self::new(Arc::new(directory), config.streaming_settings()))
    }

    pub fn directory(&self) -> &Arc<ServerDirectory> {
        &self.directory
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    pub fn catalog(&self) -> CatalogClient {
        CatalogClient::new(Arc::clone(&self.directory))
    }

    /// A fetcher with an empty Streamer Node Set
    fn fetcher(&self, stats: StreamStats) -> RangeFetcher {
        RangeFetcher::new(Arc::clone(&self.directory))
            .with_addressing(self.settings.addressing)
            .with_stats(stats)
    }

    /// Fill in a missing size (from the server) and duration (estimated).
    pub async fn prepare(&self, song: Song) -> StreamResult<Song> {
        let fetcher = self.fetcher(StreamStats::new());
        prepare_with(&fetcher, song, self.settings.fallback_bitrate_kbps).await
    }

    /// Open a session for `song` on a fresh decoder pair.
    ///
    /// Each session gets its own fetcher and ledger; nothing is shared with
    /// an earlier session except the server directory.
    pub async fn open_session(
        &self,
        song: Song,
        decoder: Arc<dyn DecoderBuffer>,
        media: Arc<dyn MediaElement>,
    ) -> StreamResult<Arc<PlaybackSession>> {
        let stats = StreamStats::new();
        let fetcher = self.fetcher(stats.clone());
        let song = prepare_with(&fetcher, song, self.settings.fallback_bitrate_kbps).await?;

        info!("Opening session for {}", song.label());

        let session = PlaybackSession::new(
            song,
            Arc::new(fetcher),
            decoder,
            media,
            &self.settings,
            stats,
        )?;
        Ok(Arc::new(session))
    }
}

async fn prepare_with(
    source: &dyn ChunkSource,
    mut song: Song,
    fallback_bitrate_kbps: u32,
) -> StreamResult<Song> {
    if song.size == 0 {
        song.size = source.content_length(&song).await?;
    }

    if !(song.duration > 0.0) || !song.duration.is_finite() {
        song.duration = Song::estimated_duration(song.size, fallback_bitrate_kbps);
        debug!(
            "Estimated {} at {:.1}s from {} bytes",
            song.composite_key(),
            song.duration,
            song.size
        );
    }

    if !song.is_streamable() {
        return Err(StreamError::InvalidSong(format!(
            "{} has no usable size or duration",
            song.composite_key()
        )));
    }

    Ok(song)
}
