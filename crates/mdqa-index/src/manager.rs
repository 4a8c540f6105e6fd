//! In-memory index lifecycle: build, load, incremental update, atomic swap.
//!
//! The manager owns a single publication slot (the index handle). Queries
//! clone the current `Arc` out of the slot and keep using that snapshot for
//! their whole lifetime; updates assemble a complete working copy off to the
//! side, persist it, and only then replace the slot. A failed update is
//! discarded without ever touching the published index.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use mdqa_core::{CachePaths, Chunk, Error, Result, ServerConfig};
use mdqa_embed::Embedder;
use mdqa_ingest::{directories_checksum, read_file, scan_files, MarkdownSplitter, ScannedFile};
use mdqa_store::VectorStore;

use crate::manifest::{FileEntry, IndexRecord, Manifest};

/// One published (store, manifest record) pair. Immutable once published.
#[derive(Debug)]
pub struct ActiveIndex {
    pub store: VectorStore,
    pub record: IndexRecord,
}

impl ActiveIndex {
    /// k-nearest chunks with distances, ascending.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>> {
        let hits = self.store.search(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, dist)| self.store.chunk(id).cloned().map(|c| (c, dist)))
            .collect())
    }
}

/// Coarse readiness, as reported to `status` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Ready,
    Indexing,
    NotReady,
}

/// What an incremental update did.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// Set when the update fell back to a full rebuild.
    pub fallback: Option<&'static str>,
    /// Set when another update was already in flight and this one was dropped.
    pub skipped: bool,
}

impl UpdateOutcome {
    fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }

    fn fallback(reason: &'static str) -> Self {
        Self { fallback: Some(reason), ..Self::default() }
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }
}

/// A file read and split, ready for embedding.
struct PreparedFile {
    path: String,
    mtime: f64,
    chunks: Vec<Chunk>,
}

/// Clears the `building` flag when a build scope ends, error paths included.
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct IndexManager {
    paths: CachePaths,
    embedder: RwLock<Arc<dyn Embedder>>,
    splitter: MarkdownSplitter,
    handle: RwLock<Option<Arc<ActiveIndex>>>,
    building: AtomicBool,
    /// Serializes writers; queries never take this.
    update_lock: tokio::sync::Mutex<()>,
}

impl IndexManager {
    pub fn new(paths: CachePaths, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            paths,
            embedder: RwLock::new(embedder),
            splitter: MarkdownSplitter::default(),
            handle: RwLock::new(None),
            building: AtomicBool::new(false),
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Swap in a new embedding backend (API reconfiguration).
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        *self.embedder.write() = embedder;
    }

    /// The embedding backend currently in use (shared with the query path).
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.read().clone()
    }

    /// Snapshot the currently published index, if any. The returned `Arc`
    /// stays valid across swaps; the old pair is dropped with its last reader.
    pub fn current(&self) -> Option<Arc<ActiveIndex>> {
        self.handle.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.handle.read().is_some()
    }

    pub fn status(&self) -> IndexStatus {
        if self.is_ready() {
            IndexStatus::Ready
        } else if self.building.load(Ordering::SeqCst) {
            IndexStatus::Indexing
        } else {
            IndexStatus::NotReady
        }
    }

    /// Search the published index. Never blocks on a concurrent update.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>> {
        let active = self.current().ok_or(Error::NotReady)?;
        active.search(query, k)
    }

    // ---------------------------------------------------------------
    // Build paths
    // ---------------------------------------------------------------

    /// Adopt the cached index if it is consistent and its manifest covers
    /// every file currently on disk; otherwise rebuild from scratch.
    pub async fn load_or_build(&self, config: &ServerConfig) -> Result<()> {
        let _guard = self.update_lock.lock().await;

        if self.paths.index_exists(&config.index_name) {
            let (vectors_path, meta_path) = self.paths.index_files(&config.index_name);
            match VectorStore::load(&vectors_path, &meta_path) {
                Ok(store) => {
                    let manifest = Manifest::load(&self.paths.manifest_file);
                    if let Some(record) = manifest.record(&config.index_name) {
                        let scanned = scan_files(&config.directories);
                        let covered = scanned.iter().all(|f| {
                            record.files.contains_key(f.path.to_string_lossy().as_ref())
                        });
                        if covered {
                            info!(
                                "loaded cached index '{}' ({} chunks, {} files)",
                                config.index_name,
                                store.len(),
                                record.files.len()
                            );
                            self.publish(store, record.clone());
                            return Ok(());
                        }
                        info!(
                            "cached index '{}' is missing per-file data for files on disk; rebuilding",
                            config.index_name
                        );
                    }
                }
                Err(e) => {
                    warn!("cached index '{}' failed to load: {e}; rebuilding", config.index_name);
                }
            }
        }

        self.rebuild_inner(config).await
    }

    /// Rebuild the whole index and publish it.
    pub async fn full_rebuild(&self, config: &ServerConfig) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        self.rebuild_inner(config).await
    }

    async fn rebuild_inner(&self, config: &ServerConfig) -> Result<()> {
        let _building = self.begin_build();
        info!(
            "building index '{}' from {} directory(ies)",
            config.index_name,
            config.directories.len()
        );

        let scanned = scan_files(&config.directories);
        let prepared = self.prepare_files(&scanned)?;
        check_collisions(&prepared, None)?;

        let vectors = self.embed_prepared(&prepared).await?;

        let mut store = VectorStore::new();
        let mut record = IndexRecord {
            directories: path_strings(config),
            checksum: directories_checksum(&scanned),
            files: Default::default(),
        };

        let mut offset = 0;
        for file in prepared {
            let ids: Vec<u64> = file.chunks.iter().map(|c| c.id).collect();
            let count = ids.len();
            store.add_with_ids(&ids, &vectors[offset..offset + count], file.chunks)?;
            record.files.insert(file.path, FileEntry { mtime: file.mtime, chunk_ids: ids });
            offset += count;
        }

        self.persist(config, &store, &record)?;
        info!(
            "index '{}' built: {} chunks from {} files",
            config.index_name,
            store.len(),
            record.files.len()
        );
        self.publish(store, record);
        Ok(())
    }

    /// Apply only the filesystem changes since the last successful build.
    ///
    /// Removals run before additions so a modified file never has two
    /// generations of chunks present at once. Any failure before publication
    /// leaves the live index untouched.
    pub async fn incremental_update(&self, config: &ServerConfig) -> Result<UpdateOutcome> {
        let Ok(_guard) = self.update_lock.try_lock() else {
            debug!("update already in flight; dropping reload request");
            return Ok(UpdateOutcome::skipped());
        };
        let _building = self.begin_build();

        let Some(active) = self.current() else {
            self.rebuild_inner(config).await?;
            return Ok(UpdateOutcome::fallback("no_current_index"));
        };
        if !active.record.has_per_file_data() {
            self.rebuild_inner(config).await?;
            return Ok(UpdateOutcome::fallback("missing_per_file_metadata"));
        }

        let scanned = scan_files(&config.directories);
        let changes = active.record.detect_changes(&scanned);
        if changes.is_empty() {
            debug!("no changes detected, skipping reload");
            return Ok(UpdateOutcome::default());
        }

        let mut working = active.store.clone();
        let mut record = active.record.clone();

        // Remove all chunks of deleted and modified files first.
        let mut stale_ids = Vec::new();
        for path in changes.deleted.iter().chain(&changes.modified) {
            if let Some(entry) = record.files.remove(path) {
                stale_ids.extend(entry.chunk_ids);
            }
        }
        working.remove_ids(&stale_ids);

        // Split, embed, and add chunks of added and modified files.
        let by_path: HashMap<String, &ScannedFile> = scanned
            .iter()
            .map(|f| (f.path.to_string_lossy().into_owned(), f))
            .collect();
        let mut targets: Vec<ScannedFile> = changes
            .added
            .iter()
            .chain(&changes.modified)
            .filter_map(|p| by_path.get(p).map(|&f| f.clone()))
            .collect();
        targets.sort_by(|a, b| a.path.cmp(&b.path));

        let prepared = self.prepare_files(&targets)?;
        check_collisions(&prepared, Some(&working))?;
        let vectors = self.embed_prepared(&prepared).await?;

        let mut offset = 0;
        for file in prepared {
            let ids: Vec<u64> = file.chunks.iter().map(|c| c.id).collect();
            let count = ids.len();
            working.add_with_ids(&ids, &vectors[offset..offset + count], file.chunks)?;
            record.files.insert(file.path, FileEntry { mtime: file.mtime, chunk_ids: ids });
            offset += count;
        }

        record.checksum = directories_checksum(&scanned);
        record.directories = path_strings(config);

        self.persist(config, &working, &record)?;
        info!(
            "incremental update of '{}': {} added, {} modified, {} deleted",
            config.index_name,
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );
        self.publish(working, record);

        Ok(UpdateOutcome {
            added: changes.added,
            modified: changes.modified,
            deleted: changes.deleted,
            fallback: None,
            skipped: false,
        })
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn begin_build(&self) -> BuildGuard<'_> {
        self.building.store(true, Ordering::SeqCst);
        BuildGuard(&self.building)
    }

    fn publish(&self, store: VectorStore, record: IndexRecord) {
        *self.handle.write() = Some(Arc::new(ActiveIndex { store, record }));
    }

    fn prepare_files(&self, files: &[ScannedFile]) -> Result<Vec<PreparedFile>> {
        let mut prepared = Vec::with_capacity(files.len());
        for file in files {
            let path = file.path.to_string_lossy().into_owned();
            let text = match read_file(&file.path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("skipping unreadable file {path}: {e}");
                    continue;
                }
            };
            let chunks = self.splitter.split_file(&path, &text)?;
            prepared.push(PreparedFile { path, mtime: file.mtime, chunks });
        }
        Ok(prepared)
    }

    async fn embed_prepared(&self, prepared: &[PreparedFile]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = prepared
            .iter()
            .flat_map(|f| f.chunks.iter().map(|c| c.text.clone()))
            .collect();
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embedder = { self.embedder.read().clone() };
        embedder.embed_many(&texts).await
    }

    fn persist(&self, config: &ServerConfig, store: &VectorStore, record: &IndexRecord) -> Result<()> {
        let (vectors_path, meta_path) = self.paths.index_files(&config.index_name);
        store.save(&vectors_path, &meta_path)?;
        let mut manifest = Manifest::load(&self.paths.manifest_file);
        manifest.set_record(&config.index_name, record.clone());
        manifest.save()
    }
}

fn path_strings(config: &ServerConfig) -> Vec<String> {
    config
        .directories
        .iter()
        .map(|d| d.to_string_lossy().into_owned())
        .collect()
}

/// A chunk id seen twice within one update is an invariant violation: abort
/// before anything is published.
fn check_collisions(prepared: &[PreparedFile], existing: Option<&VectorStore>) -> Result<()> {
    let mut seen = HashSet::new();
    for file in prepared {
        for chunk in &file.chunks {
            let collides = !seen.insert(chunk.id)
                || existing.map_or(false, |store| store.contains(chunk.id));
            if collides {
                return Err(Error::Fatal(format!(
                    "chunk id collision on {:#018x} ({})",
                    chunk.id, file.path
                )));
            }
        }
    }
    Ok(())
}
