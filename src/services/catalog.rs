use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use super::directory::ServerDirectory;
use crate::models::Song;
use crate::utils::errors::{StreamError, StreamResult};

/// Field matched by `/api/search/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBy {
    Title,
    Artist,
    Genre,
    Album,
}

impl SearchBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchBy::Title => "title",
            SearchBy::Artist => "artist",
            SearchBy::Genre => "genre",
            SearchBy::Album => "album",
        }
    }
}

impl fmt::Display for SearchBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchBy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "title" => Ok(SearchBy::Title),
            "artist" => Ok(SearchBy::Artist),
            "genre" => Ok(SearchBy::Genre),
            "album" => Ok(SearchBy::Album),
            other => Err(StreamError::Configuration(format!(
                "Unknown search field '{}'",
                other
            ))),
        }
    }
}

/// The catalog answers in a few envelope shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SongsResponse {
    Wrapped { data: SongsData },
    Bare(Vec<Song>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SongsData {
    List(Vec<Song>),
    Nested { songs: Vec<Song> },
}

impl SongsResponse {
    fn into_songs(self) -> Vec<Song> {
        match self {
            SongsResponse::Wrapped {
                data: SongsData::List(songs),
            }
            | SongsResponse::Wrapped {
                data: SongsData::Nested { songs },
            }
            | SongsResponse::Bare(songs) => songs,
        }
    }
}

/// Read-only access to the song catalog on the resolved server
pub struct CatalogClient {
    client: Client,
    directory: Arc<ServerDirectory>,
}

impl CatalogClient {
    pub fn new(directory: Arc<ServerDirectory>) -> Self {
        Self {
            client: Client::new(),
            directory,
        }
    }

    pub async fn list_songs(&self) -> StreamResult<Vec<Song>> {
        let songs = self.get_songs("/api/songs/", &[]).await?;
        info!("Catalog lists {} songs", songs.len());
        Ok(songs)
    }

    pub async fn search(&self, by: SearchBy, query: &str) -> StreamResult<Vec<Song>> {
        let songs = self
            .get_songs("/api/search/", &[("searchBy", by.as_str()), ("query", query)])
            .await?;
        info!("Search {}='{}' matched {} songs", by, query, songs.len());
        Ok(songs)
    }

    /// Look a song up by id in the full listing
    pub async fn find(&self, id: &str) -> StreamResult<Song> {
        self.list_songs()
            .await?
            .into_iter()
            .find(|song| song.id.as_str() == id)
            .ok_or_else(|| StreamError::NotFound(format!("song {} is not in the catalog", id)))
    }

    async fn get_songs(&self, path: &str, query: &[(&str, &str)]) -> StreamResult<Vec<Song>> {
        let server = self.directory.require().await?;
        let url = server.join(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
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

        let body: SongsResponse = response.json().await.map_err(StreamError::from_reqwest)?;
        Ok(body.into_songs())
    }
}
