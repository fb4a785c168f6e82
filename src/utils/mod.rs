pub mod errors;

pub use errors::{StreamError, StreamResult};
