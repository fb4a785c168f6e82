#![allow(clippy::result_large_err)]

pub mod config;
pub mod models;
pub mod player;
pub mod services;
pub mod stream;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use utils::errors::{StreamError, StreamResult};
