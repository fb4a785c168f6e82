use serde::{Deserialize, Serialize};

use super::identifiers::SongId;

/// A catalog entry as returned by `/api/songs/` and `/api/search/`
///
/// `duration` is plain seconds. Legacy catalog drafts encoded `3.45` as
/// "3 minutes 45 seconds"; that encoding is not supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub album: String,
    /// Cover art reference
    #[serde(default, alias = "coverUrl", alias = "imageUrl")]
    pub image: Option<String>,
    /// Total duration in seconds
    #[serde(default)]
    pub duration: f64,
    /// Total file size in bytes
    #[serde(default)]
    pub size: u64,
}

impl Song {
    /// Composite `title-artist` key used by discovery and key-addressed streaming
    pub fn composite_key(&self) -> String {
        format!("{}-{}", self.title, self.artist)
    }

    /// Duration and size are both known, so time can be mapped to chunks
    pub fn is_streamable(&self) -> bool {
        self.duration > 0.0 && self.duration.is_finite() && self.size > 0
    }

    /// Estimate the duration from the file size assuming a constant bitrate
    pub fn estimated_duration(size: u64, bitrate_kbps: u32) -> f64 {
        if bitrate_kbps == 0 {
            return 0.0;
        }
        let bytes_per_second = f64::from(bitrate_kbps) * 1000.0 / 8.0;
        size as f64 / bytes_per_second
    }

    /// Display label for lists and logs
    pub fn label(&self) -> String {
        if self.album.is_empty() {
            format!("{} - {}", self.artist, self.title)
        } else {
            format!("{} - {} ({})", self.artist, self.title, self.album)
        }
    }
}
