//! Shared data model: chunks and their provenance.

use serde::{Deserialize, Serialize};

/// A heading on the path from the document root to a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// ATX header level, 1..=6.
    pub level: u8,
    pub title: String,
}

/// An immutable fragment of a markdown file.
///
/// The `id` is reconstructible from `file_path` and `chunk_index` alone
/// (see `mdqa_ingest::chunk_id`), which is what makes per-file removal and
/// re-addition possible without scanning the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    /// Absolute path of the source file.
    pub file_path: String,
    /// Ordinal of this chunk within its file, dense from 0.
    pub chunk_index: u16,
    pub text: String,
    /// Stack of enclosing headers at the chunk's start, outermost first.
    #[serde(default)]
    pub headers: Vec<Heading>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_json_roundtrip() {
        let chunk = Chunk {
            id: 0xABCD_0001,
            file_path: "/docs/notes.md".into(),
            chunk_index: 1,
            text: "Alpha Bravo".into(),
            headers: vec![Heading {
                level: 2,
                title: "Callsigns".into(),
            }],
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_chunk_tolerates_missing_headers() {
        let back: Chunk = serde_json::from_str(
            r#"{"id":1,"file_path":"/a.md","chunk_index":0,"text":"x"}"#,
        )
        .unwrap();
        assert!(back.headers.is_empty());
    }
}
