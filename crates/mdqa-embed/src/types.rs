//! Capability traits for the remote model backends.
//!
//! The server depends on these traits rather than concrete clients, so tests
//! can swap in deterministic fakes and future backends only need to implement
//! two small surfaces.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use mdqa_core::Result;

/// One chat turn sent to the completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// A single streamed completion delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelta {
    Token(String),
    Done,
    Error(String),
}

/// Boxed stream type for returning different stream implementations.
pub type BoxedDeltaStream = Pin<Box<dyn Stream<Item = ChatDelta> + Send>>;

/// Embedding backend: maps texts to vectors, preserving input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| mdqa_core::Error::ApiProtocol("empty embedding response".into()))
    }
}

/// Chat backend: streams completion deltas for a message list.
pub trait ChatModel: Send + Sync {
    fn stream_chat(&self, messages: Vec<ChatMessage>) -> BoxedDeltaStream;
}
