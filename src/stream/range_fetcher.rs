use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::stats::StreamStats;
use crate::models::{Endpoint, Song};
use crate::services::directory::ServerDirectory;
use crate::utils::errors::{StreamError, StreamResult};

/// How a song is named in stream URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamAddressing {
    /// `/api/stream/<id>/`
    #[default]
    Path,
    /// `/api/stream/?song_id=<title>-<artist>`
    CompositeKey,
}

impl StreamAddressing {
    pub fn stream_url(&self, endpoint: &Endpoint, song: &Song) -> StreamResult<Url> {
        let raw = match self {
            StreamAddressing::Path => endpoint.join(&format!("/api/stream/{}/", song.id)),
            StreamAddressing::CompositeKey => endpoint.join("/api/stream/"),
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| StreamError::Configuration(format!("Invalid stream URL '{}': {}", raw, e)))?;

        if *self == StreamAddressing::CompositeKey {
            url.query_pairs_mut()
                .append_pair("song_id", &song.composite_key());
        }

        Ok(url)
    }
}

/// Source of byte ranges for a song
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch the inclusive byte range `[start, end]`.
    ///
    /// A short payload for the final chunk is valid.
    async fn fetch_range(&self, song: &Song, start: u64, end: u64) -> StreamResult<Bytes>;

    /// Total size of the song in bytes
    async fn content_length(&self, song: &Song) -> StreamResult<u64>;
}

/// HTTP `Range` fetcher with failover across streamer nodes
///
/// Owns the per-song Streamer Node Set, so one fetcher serves exactly one
/// playback session.
pub struct RangeFetcher {
    client: Client,
    directory: Arc<ServerDirectory>,
    addressing: StreamAddressing,
    streamers: RwLock<Vec<Endpoint>>,
    stats: StreamStats,
}

impl RangeFetcher {
    pub fn new(directory: Arc<ServerDirectory>) -> Self {
        Self {
            client: Client::new(),
            directory,
            addressing: StreamAddressing::default(),
            streamers: RwLock::new(Vec::new()),
            stats: StreamStats::new(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_addressing(mut self, addressing: StreamAddressing) -> Self {
        self.addressing = addressing;
        self
    }

    pub fn with_stats(mut self, stats: StreamStats) -> Self {
        self.stats = stats;
        self
    }

    /// Streamer nodes resolved so far for this session
    pub async fn known_streamers(&self) -> Vec<Endpoint> {
        self.streamers.read().await.clone()
    }

    /// Streamer Node Set, resolved on first use.
    ///
    /// Empty results are not cached so the next failure asks again.
    async fn streamers_for(&self, song: &Song) -> StreamResult<Vec<Endpoint>> {
        {
            let cached = self.streamers.read().await;
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }

        let resolved = self.directory.resolve_streamers(song).await?;
        if !resolved.is_empty() {
            *self.streamers.write().await = resolved.clone();
        }
        Ok(resolved)
    }

    async fn fetch_from(
        &self,
        endpoint: &Endpoint,
        song: &Song,
        start: u64,
        end: u64,
    ) -> StreamResult<Bytes> {
        let url = self.addressing.stream_url(endpoint, song)?;
        self.stats.increment_requested();

        debug!("GET {} bytes={}-{}", url, start, end);

        let response = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(StreamError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StreamError::NotFound(format!(
                "{} not on {}",
                song.composite_key(),
                endpoint
            )));
        }
        if !status.is_success() {
            return Err(StreamError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let data = response.bytes().await.map_err(StreamError::from_reqwest)?;
        if data.is_empty() {
            return Err(StreamError::Transport(format!("Empty body from {}", url)));
        }

        self.stats.add_bytes_received(data.len() as u64);
        Ok(data)
    }

    /// `Content-Length` from a HEAD, or the total from a one-byte range probe
    async fn size_from(&self, endpoint: &Endpoint, song: &Song) -> StreamResult<Option<u64>> {
        let url = self.addressing.stream_url(endpoint, song)?;

        let head = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(StreamError::from_reqwest)?;

        if head.status().is_success() {
            let length = head
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|len| *len > 0);
            if length.is_some() {
                return Ok(length);
            }
        }

        let probe = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(StreamError::from_reqwest)?;

        Ok(probe
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total))
    }
}

/// Total length from `bytes <start>-<end>/<total>`
fn parse_content_range_total(value: &str) -> Option<u64> {
    value
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse::<u64>().ok())
}

#[async_trait]
impl ChunkSource for RangeFetcher {
    async fn fetch_range(&self, song: &Song, start: u64, end: u64) -> StreamResult<Bytes> {
        let primary = self.directory.require().await?;

        let mut last_error = match self.fetch_from(&primary, song, start, end).await {
            Ok(data) => return Ok(data),
            Err(e) => {
                debug!("Range {}-{} failed on {}: {}", start, end, primary, e);
                e
            }
        };

        let mut tried = vec![primary];
        let alternates = self.streamers_for(song).await?;

        for alternate in alternates {
            if tried.contains(&alternate) {
                continue;
            }

            match self.fetch_from(&alternate, song, start, end).await {
                Ok(data) => {
                    info!(
                        "Range {}-{} of {} served by alternate {}",
                        start,
                        end,
                        song.composite_key(),
                        alternate
                    );
                    self.stats.increment_failover();
                    return Ok(data);
                }
                Err(e) => {
                    debug!("Range {}-{} failed on {}: {}", start, end, alternate, e);
                    last_error = e;
                    tried.push(alternate);
                }
            }
        }

        warn!(
            "Range {}-{} of {} unavailable on {} endpoints",
            start,
            end,
            song.composite_key(),
            tried.len()
        );
        Err(StreamError::NotFound(format!(
            "{} ({} endpoints tried, last error: {})",
            song.composite_key(),
            tried.len(),
            last_error
        )))
    }

    async fn content_length(&self, song: &Song) -> StreamResult<u64> {
        let server = self.directory.require().await?;

        match self.size_from(&server, song).await? {
            Some(size) => {
                debug!("{} is {} bytes", song.composite_key(), size);
                Ok(size)
            }
            None => Err(StreamError::InvalidSong(format!(
                "{} has no known size",
                song.composite_key()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::directory::ResolutionStrategy;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn song() -> Song {
        serde_json::from_value(json!({
            "id": 42, "title": "Song", "artist": "Band", "duration": 200.0, "size": 8_000_000
        }))
        .unwrap()
    }

    fn endpoint(server: &Server) -> Endpoint {
        Endpoint::parse(&server.url()).unwrap()
    }

    async fn alive(server: &mut Server) -> mockito::Mock {
        server
            .mock("HEAD", "/api/songs/")
            .with_status(200)
            .create_async()
            .await
    }

    #[test]
    fn test_stream_urls() {
        let endpoint = Endpoint::parse("http://10.0.0.1:8000").unwrap();
        let song = song();

        assert_eq!(
            StreamAddressing::Path
                .stream_url(&endpoint, &song)
                .unwrap()
                .as_str(),
            "http://10.0.0.1:8000/api/stream/42/"
        );
        assert_eq!(
            StreamAddressing::CompositeKey
                .stream_url(&endpoint, &song)
                .unwrap()
                .as_str(),
            "http://10.0.0.1:8000/api/stream/?song_id=Song-Band"
        );
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/8000000"), Some(8_000_000));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[tokio::test]
    async fn test_fetch_sends_inclusive_range() {
        let mut server = Server::new_async().await;
        let _alive = alive(&mut server).await;
        let stream = server
            .mock("GET", "/api/stream/42/")
            .match_header("range", "bytes=524288-1048575")
            .with_status(206)
            .with_body(vec![7u8; 16])
            .expect(1)
            .create_async()
            .await;

        let directory = Arc::new(ServerDirectory::new(vec![endpoint(&server)]));
        let fetcher = RangeFetcher::new(directory);

        let data = fetcher.fetch_range(&song(), 524_288, 1_048_575).await.unwrap();
        assert_eq!(data.len(), 16);
        stream.assert_async().await;
    }

    #[tokio::test]
    async fn test_truncated_final_chunk_is_valid() {
        let mut server = Server::new_async().await;
        let _alive = alive(&mut server).await;
        let _stream = server
            .mock("GET", "/api/stream/42/")
            .with_status(206)
            .with_body(vec![1u8; 3])
            .create_async()
            .await;

        let fetcher = RangeFetcher::new(Arc::new(ServerDirectory::new(vec![endpoint(&server)])));
        let data = fetcher
            .fetch_range(&song(), 7_864_320, 8_388_607)
            .await
            .unwrap();
        assert_eq!(data.as_ref(), &[1, 1, 1]);
    }

    #[tokio::test]
    async fn test_failover_to_discovered_streamer() {
        let mut primary = Server::new_async().await;
        let mut node = Server::new_async().await;
        let _alive = alive(&mut primary).await;

        let missing = primary
            .mock("GET", "/api/stream/42/")
            .with_status(404)
            .expect(2)
            .create_async()
            .await;
        let node_address = node.host_with_port();
        let lookup = primary
            .mock("GET", "/api/findStreamers/")
            .match_query(Matcher::UrlEncoded("song_id".into(), "Song-Band".into()))
            .with_status(200)
            .with_body(
                json!({"data": {"streamers": [{"ip": node_address, "id": 7}]}}).to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let served = node
            .mock("GET", "/api/stream/42/")
            .with_status(206)
            .with_body("abcd")
            .expect(2)
            .create_async()
            .await;

        let directory = Arc::new(
            ServerDirectory::new(vec![endpoint(&primary)])
                .with_strategy(ResolutionStrategy::Discovery),
        );
        let stats = StreamStats::new();
        let fetcher = RangeFetcher::new(directory).with_stats(stats.clone());

        assert_eq!(fetcher.fetch_range(&song(), 0, 3).await.unwrap().as_ref(), b"abcd");
        assert_eq!(fetcher.known_streamers().await, vec![endpoint(&node)]);

        // The Streamer Node Set is reused; the primary is still tried first
        assert_eq!(fetcher.fetch_range(&song(), 4, 7).await.unwrap().as_ref(), b"abcd");

        missing.assert_async().await;
        lookup.assert_async().await;
        served.assert_async().await;
        assert_eq!(stats.failovers.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_not_found_everywhere() {
        let mut primary = Server::new_async().await;
        let mut backup = Server::new_async().await;
        let _alive = alive(&mut primary).await;

        let _missing = primary
            .mock("GET", "/api/stream/42/")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let backup_missing = backup
            .mock("GET", "/api/stream/42/")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        // Static strategy: the other candidates are the alternates
        let directory = Arc::new(ServerDirectory::new(vec![
            endpoint(&primary),
            endpoint(&backup),
        ]));
        let fetcher = RangeFetcher::new(directory);

        let err = fetcher.fetch_range(&song(), 0, 99).await.unwrap_err();
        assert!(matches!(err, StreamError::NotFound(_)));
        assert!(err.to_string().contains("2 endpoints tried"));
        backup_missing.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_server_available() {
        let directory = Arc::new(
            ServerDirectory::new(vec![Endpoint::parse("http://127.0.0.1:9").unwrap()])
                .with_probe_timeout(std::time::Duration::from_millis(500)),
        );
        let fetcher = RangeFetcher::new(directory);

        assert_eq!(
            fetcher.fetch_range(&song(), 0, 99).await.unwrap_err(),
            StreamError::NoServerAvailable { candidates: 1 }
        );
    }

    #[tokio::test]
    async fn test_composite_key_addressing() {
        let mut server = Server::new_async().await;
        let _alive = alive(&mut server).await;
        let stream = server
            .mock("GET", "/api/stream/")
            .match_query(Matcher::UrlEncoded("song_id".into(), "Song-Band".into()))
            .with_status(206)
            .with_body("xy")
            .expect(1)
            .create_async()
            .await;

        let fetcher = RangeFetcher::new(Arc::new(ServerDirectory::new(vec![endpoint(&server)])))
            .with_addressing(StreamAddressing::CompositeKey);

        assert_eq!(fetcher.fetch_range(&song(), 0, 1).await.unwrap().as_ref(), b"xy");
        stream.assert_async().await;
    }

    #[tokio::test]
    async fn test_content_length_from_range_probe() {
        let mut server = Server::new_async().await;
        let _alive = alive(&mut server).await;
        let _head = server
            .mock("HEAD", "/api/stream/42/")
            .with_status(405)
            .create_async()
            .await;
        let _probe = server
            .mock("GET", "/api/stream/42/")
            .match_header("range", "bytes=0-0")
            .with_status(206)
            .with_header("content-range", "bytes 0-0/8000000")
            .with_body("x")
            .create_async()
            .await;

        let fetcher = RangeFetcher::new(Arc::new(ServerDirectory::new(vec![endpoint(&server)])));
        assert_eq!(fetcher.content_length(&song()).await.unwrap(), 8_000_000);
    }
}
