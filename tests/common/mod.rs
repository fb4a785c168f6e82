#![allow(dead_code)]

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{Value, json};
use std::sync::Arc;

use rangeplay::models::{Endpoint, Song};
use rangeplay::services::ServerDirectory;
use rangeplay::stream::{RetryPolicy, StreamingSettings};

/// 16 chunks of 1000 bytes, 10 seconds each
pub const CHUNK_SIZE: u64 = 1000;
pub const SONG_SIZE: u64 = 16_000;
pub const SONG_DURATION: f64 = 160.0;

/// Deterministic file contents
pub fn song_bytes(size: u64) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

pub fn song_json(id: u64, title: &str, artist: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "artist": artist,
        "genre": "test",
        "album": "Fixtures",
        "duration": SONG_DURATION,
        "size": SONG_SIZE
    })
}

pub fn song(id: u64, title: &str, artist: &str) -> Song {
    serde_json::from_value(song_json(id, title, artist)).unwrap()
}

pub fn settings() -> StreamingSettings {
    StreamingSettings {
        chunk_size: CHUNK_SIZE,
        retry: RetryPolicy::new(2, 1, 2),
        ..StreamingSettings::default()
    }
}

pub fn directory(servers: &[&MockServer]) -> Arc<ServerDirectory> {
    Arc::new(ServerDirectory::new(
        servers.iter().map(|s| s.endpoint()).collect(),
    ))
}

/// A catalog/stream server backed by mockito
pub struct MockServer {
    pub server: ServerGuard,
    mocks: Vec<Mock>,
}

impl MockServer {
    pub async fn alive() -> Self {
        Self::with_probe_status(200).await
    }

    pub async fn dead() -> Self {
        Self::with_probe_status(503).await
    }

    async fn with_probe_status(status: usize) -> Self {
        let mut server = Server::new_async().await;
        let probe = server
            .mock("HEAD", "/api/songs/")
            .with_status(status)
            .create_async()
            .await;
        Self {
            server,
            mocks: vec![probe],
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::parse(&self.server.url()).unwrap()
    }

    pub async fn serve_catalog(&mut self, songs: Vec<Value>) {
        let mock = self
            .server
            .mock("GET", "/api/songs/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": songs }).to_string())
            .create_async()
            .await;
        self.mocks.push(mock);
    }

    /// One mock per chunk, matched on the exact `Range` header
    pub async fn serve_chunks(&mut self, song_id: u64, data: &[u8]) -> Vec<Mock> {
        let mut chunks = Vec::new();
        for (index, body) in data.chunks(CHUNK_SIZE as usize).enumerate() {
            let start = index as u64 * CHUNK_SIZE;
            let end = start + CHUNK_SIZE - 1;
            let mock = self
                .server
                .mock("GET", format!("/api/stream/{}/", song_id).as_str())
                .match_header("range", format!("bytes={}-{}", start, end).as_str())
                .with_status(206)
                .with_header("content-type", "audio/mpeg")
                .with_body(body)
                .create_async()
                .await;
            chunks.push(mock);
        }
        chunks
    }

    pub async fn missing_song(&mut self, song_id: u64) -> Mock {
        self.server
            .mock("GET", format!("/api/stream/{}/", song_id).as_str())
            .with_status(404)
            .create_async()
            .await
    }

    /// `/api/findStreamers/` answering with `nodes` for `key`
    pub async fn serve_streamers(&mut self, key: &str, nodes: &[&MockServer]) -> Mock {
        let streamers: Vec<Value> = nodes
            .iter()
            .enumerate()
            .map(|(id, node)| json!({"ip": node.server.host_with_port(), "id": id}))
            .collect();

        self.server
            .mock("GET", "/api/findStreamers/")
            .match_query(Matcher::UrlEncoded("song_id".into(), key.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"data": {"streamers": streamers, "nodes": []}}).to_string())
            .create_async()
            .await
    }
}
