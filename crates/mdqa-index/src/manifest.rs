//! On-disk bookkeeping for built indexes.
//!
//! A single JSON file (`indexes.json` in the cache directory) records, per
//! index, the directories it covers, an overall checksum, and for every
//! indexed file its mtime and chunk ids. The per-file entries are what make
//! incremental reloads possible; when they are absent the index manager falls
//! back to a full rebuild.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use mdqa_core::Result;
use mdqa_ingest::ScannedFile;
use mdqa_store::write_atomic;

/// Per-file bookkeeping: `chunk_ids` mirrors exactly what the vector store
/// holds for this path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub mtime: f64,
    pub chunk_ids: Vec<u64>,
}

/// Everything recorded about one named index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
}

/// Files that differ between the manifest and a fresh scan.
#[derive(Debug, Default, PartialEq)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

impl IndexRecord {
    /// Diff the recorded files against a scan. A file counts as modified
    /// whenever its mtime differs from the recorded one, regressions included.
    pub fn detect_changes(&self, scanned: &[ScannedFile]) -> FileChanges {
        let mut changes = FileChanges::default();
        let mut present = std::collections::HashSet::with_capacity(scanned.len());

        for file in scanned {
            let path = file.path.to_string_lossy().into_owned();
            match self.files.get(&path) {
                None => changes.added.push(path.clone()),
                Some(entry) if entry.mtime != file.mtime => changes.modified.push(path.clone()),
                Some(_) => {}
            }
            present.insert(path);
        }
        for path in self.files.keys() {
            if !present.contains(path) {
                changes.deleted.push(path.clone());
            }
        }
        changes
    }

    /// Whether incremental updates are possible for this record.
    pub fn has_per_file_data(&self) -> bool {
        !self.files.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ManifestData {
    #[serde(default)]
    indexes: BTreeMap<String, IndexRecord>,
}

/// The manifest file plus its parsed contents.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    data: ManifestData,
}

impl Manifest {
    /// Load the manifest, treating a missing or unreadable file as empty
    /// (an empty manifest simply forces a full rebuild).
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(data) => data,
                Err(e) => {
                    warn!("ignoring unreadable manifest {}: {e}", path.display());
                    ManifestData::default()
                }
            },
            Err(_) => ManifestData::default(),
        };
        Self {
            path: path.to_path_buf(),
            data,
        }
    }

    pub fn record(&self, index_name: &str) -> Option<&IndexRecord> {
        self.data.indexes.get(index_name)
    }

    pub fn set_record(&mut self, index_name: &str, record: IndexRecord) {
        self.data.indexes.insert(index_name.to_string(), record);
    }

    /// Persist atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, |w| {
            serde_json::to_writer_pretty(&mut *w, &self.data)?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanned(path: &str, mtime: f64) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(path),
            mtime,
        }
    }

    fn record_with(files: &[(&str, f64)]) -> IndexRecord {
        IndexRecord {
            directories: vec!["/docs".into()],
            checksum: "abc".into(),
            files: files
                .iter()
                .map(|(p, m)| {
                    (
                        p.to_string(),
                        FileEntry {
                            mtime: *m,
                            chunk_ids: vec![1],
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_detect_changes_classifies() {
        let record = record_with(&[("/docs/a.md", 100.0), ("/docs/b.md", 200.0), ("/docs/c.md", 300.0)]);
        let scan = vec![
            scanned("/docs/a.md", 100.0),  // unchanged
            scanned("/docs/b.md", 250.0),  // modified
            scanned("/docs/new.md", 50.0), // added
        ];
        let changes = record.detect_changes(&scan);
        assert_eq!(changes.added, vec!["/docs/new.md"]);
        assert_eq!(changes.modified, vec!["/docs/b.md"]);
        assert_eq!(changes.deleted, vec!["/docs/c.md"]);
    }

    #[test]
    fn test_mtime_regression_counts_as_modified() {
        let record = record_with(&[("/docs/a.md", 100.0)]);
        let changes = record.detect_changes(&[scanned("/docs/a.md", 90.0)]);
        assert_eq!(changes.modified, vec!["/docs/a.md"]);
    }

    #[test]
    fn test_no_changes_is_empty() {
        let record = record_with(&[("/docs/a.md", 100.0)]);
        assert!(record.detect_changes(&[scanned("/docs/a.md", 100.0)]).is_empty());
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexes.json");

        let mut manifest = Manifest::load(&path);
        assert!(manifest.record("default").is_none());

        let record = record_with(&[("/docs/a.md", 123.5)]);
        manifest.set_record("default", record.clone());
        manifest.save().unwrap();

        let reloaded = Manifest::load(&path);
        assert_eq!(reloaded.record("default"), Some(&record));
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexes.json");
        std::fs::write(
            &path,
            r#"{"indexes":{"default":{"directories":["/d"],"checksum":"x","files":{},"future_field":1}},"version":2}"#,
        )
        .unwrap();
        let manifest = Manifest::load(&path);
        assert_eq!(manifest.record("default").unwrap().checksum, "x");
    }

    #[test]
    fn test_corrupt_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexes.json");
        std::fs::write(&path, "{nope").unwrap();
        assert!(Manifest::load(&path).record("default").is_none());
    }
}
