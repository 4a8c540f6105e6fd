//! Shared foundation for the markdown Q&A server: error taxonomy,
//! configuration snapshots, cache layout, and the chunk data model.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ApiConfig, CachePaths, CliOverrides, ServerConfig};
pub use error::{Error, Result};
pub use types::{Chunk, Heading};
