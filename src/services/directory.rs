use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{Endpoint, Song, StreamerNode};
use crate::utils::errors::{StreamError, StreamResult};

/// How alternates are found when the primary server cannot serve a range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Every candidate holds the whole catalog; alternates are the other candidates
    #[default]
    Static,
    /// Alternates are the streamer nodes reported by `/api/findStreamers/`
    Discovery,
}

#[derive(Debug, Deserialize)]
struct FindStreamersResponse {
    data: StreamersData,
}

#[derive(Debug, Deserialize)]
struct StreamersData {
    #[serde(default)]
    streamers: Vec<StreamerNode>,
}

/// Ordered list of candidate servers with a sticky preference for the last
/// one verified reachable
///
/// Constructed explicitly and injected; independent sessions can hold
/// independent directories.
pub struct ServerDirectory {
    client: Client,
    candidates: Vec<Endpoint>,
    current: AtomicUsize,
    strategy: ResolutionStrategy,
    probe_path: String,
    probe_timeout: Duration,
    streamer_port: u16,
}

impl ServerDirectory {
    pub fn new(candidates: Vec<Endpoint>) -> Self {
        Self::with_client(Client::new(), candidates)
    }

    pub fn with_client(client: Client, candidates: Vec<Endpoint>) -> Self {
        Self {
            client,
            candidates,
            current: AtomicUsize::new(0),
            strategy: ResolutionStrategy::default(),
            probe_path: "/api/songs/".to_string(),
            probe_timeout: Duration::from_secs(2),
            streamer_port: 8000,
        }
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_probe_path(mut self, probe_path: impl Into<String>) -> Self {
        self.probe_path = probe_path.into();
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_streamer_port(mut self, streamer_port: u16) -> Self {
        self.streamer_port = streamer_port;
        self
    }

    pub fn candidates(&self) -> &[Endpoint] {
        &self.candidates
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Index of the sticky candidate (0 until one has been verified)
    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// The sticky candidate, without probing it
    pub fn current(&self) -> Option<&Endpoint> {
        self.candidates.get(self.current_index())
    }

    /// Bounded-timeout liveness check.
    ///
    /// Timeouts, network errors and non-success statuses all count as
    /// unreachable.
    pub async fn probe(&self, candidate: &Endpoint) -> bool {
        let url = candidate.join(&self.probe_path);

        match self
            .client
            .head(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("✓ {} reachable", candidate);
                true
            }
            Ok(response) => {
                debug!("✗ {} answered {}", candidate, response.status());
                false
            }
            Err(e) => {
                debug!("✗ {} unreachable: {}", candidate, StreamError::from_reqwest(e));
                false
            }
        }
    }

    /// Find a reachable server.
    ///
    /// The sticky candidate is checked first; otherwise the remaining
    /// candidates are scanned in priority order and the first reachable one
    /// becomes sticky. Returns `None` when every candidate fails.
    pub async fn resolve(&self) -> Option<Endpoint> {
        if self.candidates.is_empty() {
            warn!("Server directory has no candidates");
            return None;
        }

        let sticky = self.current_index();
        if let Some(candidate) = self.candidates.get(sticky)
            && self.probe(candidate).await
        {
            return Some(candidate.clone());
        }

        for (index, candidate) in self.candidates.iter().enumerate() {
            if index == sticky {
                continue;
            }

            if self.probe(candidate).await {
                self.current.store(index, Ordering::Release);
                info!("Switched to server {} (candidate {})", candidate, index);
                return Some(candidate.clone());
            }
        }

        warn!(
            "No server available among {} candidates",
            self.candidates.len()
        );
        None
    }

    /// Like [`resolve`](Self::resolve), but absence becomes `NoServerAvailable`
    pub async fn require(&self) -> StreamResult<Endpoint> {
        self.resolve()
            .await
            .ok_or(StreamError::NoServerAvailable {
                candidates: self.candidates.len(),
            })
    }

    /// Endpoints that can serve `song`, used as alternates for range fetches.
    ///
    /// An empty set means the song is not available anywhere.
    pub async fn resolve_streamers(&self, song: &Song) -> StreamResult<Vec<Endpoint>> {
        match self.strategy {
            ResolutionStrategy::Static => Ok(self.candidates.clone()),
            ResolutionStrategy::Discovery => self.discover_streamers(song).await,
        }
    }

    async fn discover_streamers(&self, song: &Song) -> StreamResult<Vec<Endpoint>> {
        let server = self.require().await?;
        let url = server.join("/api/findStreamers/");
        let key = song.composite_key();

        debug!("Looking up streamers for {} via {}", key, server);

        let response = self
            .client
            .get(&url)
            .query(&[("song_id", key.as_str())])
            .send()
            .await
            .map_err(StreamError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body: FindStreamersResponse = response
            .json()
            .await
            .map_err(StreamError::from_reqwest)?;

        let mut streamers: Vec<Endpoint> = Vec::new();
        for node in body.data.streamers {
            match Endpoint::from_node_address(&node.ip, self.streamer_port) {
                Ok(endpoint) if !streamers.contains(&endpoint) => streamers.push(endpoint),
                Ok(_) => {}
                Err(e) => warn!("Ignoring streamer node '{}': {}", node.ip, e),
            }
        }

        if streamers.is_empty() {
            warn!("No streamer holds {}", key);
        } else {
            info!("Discovered {} streamers for {}", streamers.len(), key);
        }

        Ok(streamers)
    }

    /// Probe every candidate concurrently without moving the sticky pointer
    pub async fn probe_all(&self) -> Vec<(Endpoint, bool)> {
        let probes = self.candidates.iter().map(|candidate| async move {
            (candidate.clone(), self.probe(candidate).await)
        });
        join_all(probes).await
    }
}
