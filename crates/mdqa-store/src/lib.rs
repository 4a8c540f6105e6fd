//! Vector storage: an ID-mapped flat similarity index, the chunk table that
//! travels with it, and atomic save/load.

pub mod index;
pub mod store;

pub use index::VectorIndex;
pub use store::{write_atomic, VectorStore};
