//! Markdown ingestion: file discovery and structure-aware chunking.

pub mod loader;
pub mod splitter;

pub use loader::{chunk_id, directories_checksum, read_file, scan_files, ScannedFile};
pub use splitter::{MarkdownSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
