//! Remote model access: embedding generation with a content-hash cache and
//! streaming chat completions, both against an OpenAI-compatible API.

pub mod cache;
pub mod openai;
pub mod types;

pub use cache::EmbeddingCache;
pub use openai::{OpenAiChat, OpenAiEmbedder};
pub use types::{BoxedDeltaStream, ChatDelta, ChatMessage, ChatModel, Embedder};
