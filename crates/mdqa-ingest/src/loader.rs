//! Markdown file discovery.
//!
//! Scans configured root directories for `.md` files and reports each with
//! its modification time. Scan output is sorted by absolute path so repeated
//! scans of an unchanged tree are byte-for-byte identical.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::warn;
use walkdir::WalkDir;

use mdqa_core::{Error, Result};

/// Symlink chains are not followed, and traversal depth is bounded so a
/// pathological tree cannot stall a reload.
const MAX_DEPTH: usize = 64;

/// One discovered markdown file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Seconds since the Unix epoch, fractional.
    pub mtime: f64,
}

fn mtime_seconds(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Recursively enumerate `.md` files under the given roots.
///
/// Nonexistent or non-directory roots are skipped with a warning. Overlapping
/// roots are deduplicated by absolute path.
pub fn scan_files(directories: &[PathBuf]) -> Vec<ScannedFile> {
    let mut found: BTreeMap<PathBuf, f64> = BTreeMap::new();

    for root in directories {
        let root = match root.canonicalize() {
            Ok(p) => p,
            Err(_) => {
                warn!("skipping directory that does not exist: {}", root.display());
                continue;
            }
        };
        if !root.is_dir() {
            warn!("skipping path that is not a directory: {}", root.display());
            continue;
        }

        for entry in WalkDir::new(&root)
            .follow_links(false)
            .max_depth(MAX_DEPTH)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            found.insert(path.to_path_buf(), mtime_seconds(&meta));
        }
    }

    found
        .into_iter()
        .map(|(path, mtime)| ScannedFile { path, mtime })
        .collect()
}

/// Read one markdown file as UTF-8.
pub fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(Error::from)
}

/// Checksum over the current `(path, mtime)` set; changes whenever a file is
/// added, removed, or touched.
pub fn directories_checksum(files: &[ScannedFile]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.to_string_lossy().as_bytes());
        hasher.update(b":");
        hasher.update(format!("{}", file.mtime).as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Deterministic chunk identifier: the upper bits come from the file path's
/// sha256 prefix, the lower 16 from the chunk's ordinal within the file.
///
/// `id = prefix48(sha256(file_path)) << 16 | chunk_index`, where the prefix is
/// the first 8 hex digits of the digest parsed as an integer. The same
/// `(path, index)` pair always maps to the same id, so a file's chunks can be
/// removed and re-added without consulting the store.
pub fn chunk_id(file_path: &str, chunk_index: u16) -> u64 {
    let digest = hex::encode(Sha256::digest(file_path.as_bytes()));
    let prefix = u64::from_str_radix(&digest[..8], 16).expect("hex digest prefix");
    (prefix << 16) | u64::from(chunk_index)
}
