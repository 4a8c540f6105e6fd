//! Vector store: the similarity index plus its parallel chunk table, with
//! atomic on-disk persistence.
//!
//! # Vector file layout (`{name}.faiss`)
//!
//! ```text
//! Offset   Size      Type       Description
//! ──────────────────────────────────────────────
//! 0x00     8         [u8; 8]    Magic: "MDQAVEC1"
//! 0x08     4         u32 LE     N: number of vectors
//! 0x0C     4         u32 LE     D: dimensions
//! 0x10     N*8       [u64 LE]   Chunk ids, row order
//! ...      N*D*4     [f32 LE]   Vector data, row-major
//! ```
//!
//! The chunk table (`{name}.meta`) is JSON. Both files are written to a
//! temporary file in the target directory, fsynced, and renamed into place,
//! so a crash leaves either the old pair or the new pair.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use mdqa_core::{Chunk, Error, Result};

use crate::index::VectorIndex;

/// Magic bytes identifying a vector file.
pub const MAGIC: [u8; 8] = *b"MDQAVEC1";

#[derive(Serialize, Deserialize)]
struct MetaFile {
    chunks: Vec<Chunk>,
}

/// Similarity index plus chunk metadata, with matching id sets.
#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    index: VectorIndex,
    chunks: BTreeMap<u64, Chunk>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.index.dim()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.chunks.contains_key(&id)
    }

    pub fn chunk(&self, id: u64) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    /// Ids of every chunk belonging to `file_path`.
    pub fn chunk_ids_for_file(&self, file_path: &str) -> Vec<u64> {
        self.chunks
            .values()
            .filter(|c| c.file_path == file_path)
            .map(|c| c.id)
            .collect()
    }

    /// Append chunks and their vectors. `ids`, `vectors`, and `chunks` are
    /// parallel; each chunk must carry the id at its position.
    pub fn add_with_ids(&mut self, ids: &[u64], vectors: &[Vec<f32>], chunks: Vec<Chunk>) -> Result<()> {
        if ids.len() != chunks.len() {
            return Err(Error::Store(format!(
                "add_with_ids: {} ids but {} chunks",
                ids.len(),
                chunks.len()
            )));
        }
        if let Some((id, chunk)) = ids.iter().zip(&chunks).find(|(id, c)| **id != c.id) {
            return Err(Error::Store(format!(
                "add_with_ids: id {id} does not match chunk id {}",
                chunk.id
            )));
        }

        self.index.add_with_ids(ids, vectors)?;
        for chunk in chunks {
            self.chunks.insert(chunk.id, chunk);
        }
        Ok(())
    }

    /// Remove chunks by id. Unknown ids are ignored.
    pub fn remove_ids(&mut self, ids: &[u64]) -> usize {
        let removed = self.index.remove_ids(ids);
        for id in ids {
            self.chunks.remove(id);
        }
        removed
    }

    /// k-nearest chunk ids with distances, ascending.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.index.search(query, k)
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    pub fn save(&self, vectors_path: &Path, meta_path: &Path) -> Result<()> {
        write_atomic(vectors_path, |w| {
            w.write_all(&MAGIC)?;
            w.write_all(&(self.index.len() as u32).to_le_bytes())?;
            w.write_all(&(self.index.dim() as u32).to_le_bytes())?;
            for id in self.index.ids() {
                w.write_all(&id.to_le_bytes())?;
            }
            for value in self.index.vectors() {
                w.write_all(&value.to_le_bytes())?;
            }
            Ok(())
        })?;

        let meta = MetaFile {
            chunks: self.chunks.values().cloned().collect(),
        };
        write_atomic(meta_path, |w| {
            serde_json::to_writer(w, &meta)?;
            Ok(())
        })?;

        debug!(
            "saved {} vectors to {} and {}",
            self.len(),
            vectors_path.display(),
            meta_path.display()
        );
        Ok(())
    }

    pub fn load(vectors_path: &Path, meta_path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(vectors_path)?;
        let mut header = [0u8; 16];
        file.read_exact(&mut header)
            .map_err(|_| Error::Inconsistency("vector file too small for header".into()))?;
        if header[0..8] != MAGIC {
            return Err(Error::Inconsistency("bad magic in vector file".into()));
        }
        let count = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes")) as usize;
        let dim = u32::from_le_bytes(header[12..16].try_into().expect("4 bytes")) as usize;

        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        let expected = count * 8 + count * dim * 4;
        if body.len() != expected {
            return Err(Error::Inconsistency(format!(
                "vector file body is {} bytes, expected {expected}",
                body.len()
            )));
        }

        let ids: Vec<u64> = body[..count * 8]
            .chunks_exact(8)
            .map(|b| u64::from_le_bytes(b.try_into().expect("8 bytes")))
            .collect();
        let vectors: Vec<f32> = body[count * 8..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().expect("4 bytes")))
            .collect();

        let index = VectorIndex::from_parts(dim, ids, vectors)?;

        let meta_raw = std::fs::read_to_string(meta_path)?;
        let meta: MetaFile = serde_json::from_str(&meta_raw)
            .map_err(|e| Error::Inconsistency(format!("unreadable chunk table: {e}")))?;

        let mut chunks = BTreeMap::new();
        for chunk in meta.chunks {
            if chunks.insert(chunk.id, chunk).is_some() {
                return Err(Error::Inconsistency("duplicate id in chunk table".into()));
            }
        }

        // The two tables must describe exactly the same id set.
        if chunks.len() != index.len() || index.ids().iter().any(|id| !chunks.contains_key(id)) {
            return Err(Error::Inconsistency(
                "vector file and chunk table id sets diverge".into(),
            ));
        }

        Ok(Self { index, chunks })
    }
}

/// Write a file atomically: temp file in the same directory, fsync, rename.
pub fn write_atomic(path: &Path, fill: impl FnOnce(&mut std::io::BufWriter<&std::fs::File>) -> Result<()>) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        Error::Store(format!("no parent directory for {}", path.display()))
    })?;
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = std::io::BufWriter::new(tmp.as_file());
        fill(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::Store(format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u64, path: &str, idx: u16, text: &str) -> Chunk {
        Chunk {
            id,
            file_path: path.into(),
            chunk_index: idx,
            text: text.into(),
            headers: Vec::new(),
        }
    }

    fn sample_store() -> VectorStore {
        let mut store = VectorStore::new();
        store
            .add_with_ids(
                &[10, 20, 30],
                &[vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 2.0]],
                vec![
                    chunk(10, "/docs/a.md", 0, "alpha"),
                    chunk(20, "/docs/a.md", 1, "bravo"),
                    chunk(30, "/docs/b.md", 0, "charlie"),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_chunk_lookup_follows_index() {
        let store = sample_store();
        let hits = store.search(&[0.0, 1.9], 1).unwrap();
        assert_eq!(hits[0].0, 30);
        assert_eq!(store.chunk(30).unwrap().text, "charlie");
    }

    #[test]
    fn test_chunk_ids_for_file() {
        let store = sample_store();
        assert_eq!(store.chunk_ids_for_file("/docs/a.md"), vec![10, 20]);
        assert_eq!(store.chunk_ids_for_file("/docs/none.md"), Vec::<u64>::new());
    }

    #[test]
    fn test_mismatched_chunk_id_rejected() {
        let mut store = VectorStore::new();
        let err = store
            .add_with_ids(&[1], &[vec![0.0]], vec![chunk(2, "/a.md", 0, "x")])
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_keeps_tables_in_step() {
        let mut store = sample_store();
        assert_eq!(store.remove_ids(&[10, 999]), 1);
        assert!(store.chunk(10).is_none());
        assert_eq!(store.len(), 2);
        // Second removal is a no-op.
        assert_eq!(store.remove_ids(&[10]), 0);
    }

    #[test]
    fn test_save_load_roundtrip_preserves_search() {
        let dir = tempfile::tempdir().unwrap();
        let vectors_path = dir.path().join("default.faiss");
        let meta_path = dir.path().join("default.meta");

        let store = sample_store();
        store.save(&vectors_path, &meta_path).unwrap();

        let loaded = VectorStore::load(&vectors_path, &meta_path).unwrap();
        assert_eq!(loaded.len(), store.len());
        assert_eq!(loaded.dim(), store.dim());

        let q = [0.4, 0.3];
        let before = store.search(&q, 3).unwrap();
        let after = loaded.search(&q, 3).unwrap();
        assert_eq!(before, after);
        assert_eq!(loaded.chunk(20).unwrap().text, "bravo");
    }

    #[test]
    fn test_empty_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vectors_path = dir.path().join("e.faiss");
        let meta_path = dir.path().join("e.meta");

        VectorStore::new().save(&vectors_path, &meta_path).unwrap();
        let loaded = VectorStore::load(&vectors_path, &meta_path).unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.search(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_diverged_tables_detected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let vectors_path = dir.path().join("d.faiss");
        let meta_path = dir.path().join("d.meta");

        sample_store().save(&vectors_path, &meta_path).unwrap();
        // Drop one chunk from the meta file behind the store's back.
        let mut meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
        meta["chunks"].as_array_mut().unwrap().pop();
        std::fs::write(&meta_path, meta.to_string()).unwrap();

        let err = VectorStore::load(&vectors_path, &meta_path).unwrap_err();
        assert!(matches!(err, Error::Inconsistency(_)));
    }

    #[test]
    fn test_bad_magic_detected() {
        let dir = tempfile::tempdir().unwrap();
        let vectors_path = dir.path().join("m.faiss");
        let meta_path = dir.path().join("m.meta");
        sample_store().save(&vectors_path, &meta_path).unwrap();

        let mut bytes = std::fs::read(&vectors_path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&vectors_path, bytes).unwrap();

        assert!(matches!(
            VectorStore::load(&vectors_path, &meta_path),
            Err(Error::Inconsistency(_))
        ));
    }

    #[test]
    fn test_clone_is_independent() {
        let store = sample_store();
        let mut copy = store.clone();
        copy.remove_ids(&[10, 20, 30]);
        assert!(copy.is_empty());
        assert_eq!(store.len(), 3);
    }
}
