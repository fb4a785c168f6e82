pub mod catalog;
pub mod directory;

pub use catalog::{CatalogClient, SearchBy};
pub use directory::{ResolutionStrategy, ServerDirectory};
