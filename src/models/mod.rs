mod endpoint;
mod identifiers;
mod song;

pub use endpoint::{Endpoint, StreamerNode};
pub use identifiers::SongId;
pub use song::Song;
