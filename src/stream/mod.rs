pub mod append;
pub mod chunk;
pub mod config;
pub mod ledger;
pub mod monitor;
pub mod range_fetcher;
pub mod retry;
pub mod session;
pub mod stats;
pub mod status;
pub mod streamer;

pub use chunk::{DEFAULT_CHUNK_SIZE, chunk_index_for};
pub use config::StreamingSettings;
pub use ledger::ChunkLedger;
pub use monitor::{BufferMonitor, FetchReason, TickAction};
pub use range_fetcher::{ChunkSource, RangeFetcher, StreamAddressing};
pub use retry::RetryPolicy;
pub use session::{PlaybackSession, SessionEvent};
pub use stats::StreamStats;
pub use status::PlaybackStatus;
pub use streamer::Streamer;
