pub mod headless;
pub mod traits;

pub use headless::HeadlessPlayer;
pub use traits::{
    ChunkPayload, DecoderBuffer, MediaElement, ReadyState, RegionHandle, TimeRange,
    range_containing,
};
