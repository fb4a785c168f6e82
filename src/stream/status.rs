use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// User-visible state of a playback session
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackStatus {
    /// Session constructed, not started
    Idle,
    /// Waiting for the decoder and the bootstrap chunk
    Loading,
    /// Playback position is not covered, or about to run dry while a fetch runs
    Buffering,
    Playing,
    Paused,
    Seeking,
    Ended,
    /// Terminal failure; the session will not fetch again
    Failed(String),
}

impl PlaybackStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Buffering => write!(f, "buffering"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Seeking => write!(f, "seeking"),
            Self::Ended => write!(f, "ended"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Publishes status changes to any number of observers
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<PlaybackStatus>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PlaybackStatus::Idle);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> PlaybackStatus {
        self.tx.borrow().clone()
    }

    /// Change the status; a failed session stays failed
    pub fn set(&self, status: PlaybackStatus) {
        self.tx.send_if_modified(|current| {
            if current.is_failed() || *current == status {
                return false;
            }
            debug!("Playback status: {} -> {}", current, status);
            *current = status;
            true
        });
    }
}
