//! WebSocket message types. Client ↔ server JSON, discriminated by `type`.

use serde::{Deserialize, Serialize};

/// Client → server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Query {
        question: String,
        #[serde(default)]
        index: Option<String>,
    },
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Ready,
    Indexing,
    NotReady,
}

/// Server → client messages. A query answer is always the phase sequence
/// `stream_start`, zero or more `stream_chunk`, `stream_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StreamStart,
    StreamChunk {
        chunk: String,
    },
    StreamEnd {
        sources: Vec<String>,
    },
    Error {
        message: String,
    },
    Status {
        status: ServerStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }
}

/// First-seen unique paths, order preserving.
pub fn deduplicate_sources(paths: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for path in paths {
        if seen.insert(path.clone()) {
            unique.push(path);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"query","question":"What is Charlie?"}"#).unwrap();
        match msg {
            ClientMessage::Query { question, index } => {
                assert_eq!(question, "What is Charlie?");
                assert!(index.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_query_message_with_index() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"query","question":"q","index":"docs"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Query { index: Some(i), .. } if i == "docs"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"response"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"question":"no type"}"#).is_err());
    }

    #[test]
    fn test_server_message_wire_shapes() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::StreamStart).unwrap(),
            r#"{"type":"stream_start"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::StreamChunk { chunk: "hi".into() }).unwrap(),
            r#"{"type":"stream_chunk","chunk":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::StreamEnd { sources: vec!["/a.md".into()] })
                .unwrap(),
            r#"{"type":"stream_end","sources":["/a.md"]}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::Status {
                status: ServerStatus::NotReady,
                message: None
            })
            .unwrap(),
            r#"{"type":"status","status":"not_ready"}"#
        );
    }

    #[test]
    fn test_deduplicate_sources_keeps_first_occurrence() {
        let paths = vec![
            "/b.md".to_string(),
            "/a.md".to_string(),
            "/b.md".to_string(),
            "/c.md".to_string(),
            "/a.md".to_string(),
        ];
        assert_eq!(deduplicate_sources(paths), vec!["/b.md", "/a.md", "/c.md"]);
    }
}
