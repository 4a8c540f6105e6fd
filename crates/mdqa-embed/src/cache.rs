//! Content-addressed embedding cache.
//!
//! Keyed by sha256 of the chunk text, so identical text never hits the API
//! twice, across process restarts. Entries are written once and never mutated;
//! concurrent writers of the same key produce identical files.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    embedding: Vec<f32>,
}

/// Two-level cache: in-memory map in front of one JSON file per entry under
/// the cache directory.
pub struct EmbeddingCache {
    dir: PathBuf,
    mem: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            mem: RwLock::new(HashMap::new()),
        }
    }

    /// sha256 hex digest of the text, used as key and file stem.
    pub fn key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(text);
        if let Some(hit) = self.mem.read().get(&key) {
            return Some(hit.clone());
        }

        let path = self.dir.join(format!("{key}.json"));
        let raw = std::fs::read_to_string(path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(e) => e,
            Err(e) => {
                // Corrupted entry: treat as a miss, it will be rewritten.
                debug!("discarding corrupted embedding cache entry {key}: {e}");
                return None;
            }
        };
        self.mem.write().insert(key, entry.embedding.clone());
        Some(entry.embedding)
    }

    pub fn put(&self, text: &str, embedding: Vec<f32>) {
        let key = Self::key(text);
        let path = self.dir.join(format!("{key}.json"));
        if !path.exists() {
            match serde_json::to_string(&CacheEntry { embedding: embedding.clone() }) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(&path, json) {
                        debug!("embedding cache write failed for {key}: {e}");
                    }
                }
                Err(e) => debug!("embedding cache encode failed for {key}: {e}"),
            }
        }
        self.mem.write().insert(key, embedding);
    }

    pub fn len(&self) -> usize {
        self.mem.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_then_hit_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().to_path_buf());

        assert!(cache.get("alpha").is_none());
        cache.put("alpha", vec![0.25, -1.5, 3.0]);
        assert_eq!(cache.get("alpha").unwrap(), vec![0.25, -1.5, 3.0]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = EmbeddingCache::new(dir.path().to_path_buf());
            cache.put("alpha", vec![1.0, 2.0]);
        }
        let cache = EmbeddingCache::new(dir.path().to_path_buf());
        assert_eq!(cache.get("alpha").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_key_is_sha256_hex() {
        // sha256("") is a well-known digest.
        assert_eq!(
            EmbeddingCache::key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().to_path_buf());
        let key = EmbeddingCache::key("bad");
        std::fs::write(dir.path().join(format!("{key}.json")), "not json").unwrap();
        assert!(cache.get("bad").is_none());
    }
}
