use thiserror::Error;

/// Typed error enum for streaming operations
///
/// The variants mirror the failure taxonomy of the engine so callers can
/// decide between "skip this tick", "retry" and "give up".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Every candidate server failed its liveness probe
    #[error("No server available ({candidates} candidates probed)")]
    NoServerAvailable { candidates: usize },

    /// The song is absent from the primary server and every streamer node
    #[error("Song not found on any streamer: {0}")]
    NotFound(String),

    /// Timeout, connection reset, unreadable body
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from a single endpoint
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// The media pipeline has not reached a writable state yet
    #[error("Decoder buffer is not open")]
    BufferNotOpen,

    /// The decoder rejected an operation (e.g. append while updating)
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Duration or size missing where chunk translation needs them
    #[error("Invalid song metadata: {0}")]
    InvalidSong(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A seek replaced the operation before it finished retrying
    #[error("Superseded by a newer seek")]
    Superseded,

    #[error("Gave up on chunk {chunk_index} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        chunk_index: u64,
        attempts: u32,
        last_error: String,
    },
}

impl StreamError {
    /// Errors that are retried by re-issuing the same fetch.
    ///
    /// Absent songs and transport failures are treated identically here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::Transport(_) | StreamError::Status { .. } | StreamError::NotFound(_)
        )
    }

    /// Errors that must stop the session and be surfaced to the user
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamError::NoServerAvailable { .. }
                | StreamError::RetriesExhausted { .. }
                | StreamError::InvalidSong(_)
                | StreamError::Configuration(_)
        )
    }

    /// Create an error from a reqwest error
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            StreamError::Transport(format!("Request timeout: {}", error))
        } else if error.is_connect() {
            StreamError::Transport(format!("Connection failed: {}", error))
        } else if error.is_request() {
            StreamError::Transport(format!("Request error: {}", error))
        } else if error.is_body() || error.is_decode() {
            StreamError::Transport(format!("Failed to read body: {}", error))
        } else {
            StreamError::Transport(error.to_string())
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(error: reqwest::Error) -> Self {
        StreamError::from_reqwest(error)
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
