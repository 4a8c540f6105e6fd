//! The query pipeline: embed the question, retrieve, prompt the chat model,
//! and stream the answer as protocol phases.
//!
//! The pipeline pins one index snapshot up front and uses it for the whole
//! query, so a reload that swaps the index mid-query is never observed.
//! Failures before retrieval finish as a single `error` message; once
//! `stream_start` is out, failures become an in-stream `[error] ...` chunk so
//! the phase sequence stays well-formed for clients.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio_stream::StreamExt;
use tracing::debug;

use mdqa_core::Chunk;
use mdqa_embed::{ChatDelta, ChatMessage, ChatModel, Embedder};
use mdqa_index::IndexManager;

use crate::protocol::{deduplicate_sources, ServerMessage};
use crate::state::QueryOptions;

/// Answer streamed when retrieval comes back empty.
pub const NO_CONTENT_ANSWER: &str =
    "No relevant content found in the loaded markdown files to answer this question.";

/// Marker prefixed to the final chunk when the chat stream fails midway.
pub const ERROR_SENTINEL: &str = "[error] ";

pub type MessageStream = Pin<Box<dyn Stream<Item = ServerMessage> + Send>>;

pub struct QueryPipeline {
    manager: Arc<IndexManager>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    options: QueryOptions,
}

impl QueryPipeline {
    pub fn new(
        manager: Arc<IndexManager>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        options: QueryOptions,
    ) -> Self {
        Self { manager, embedder, chat, options }
    }

    /// Run one query to completion, yielding protocol messages in phase order.
    pub fn run(self, question: String) -> MessageStream {
        Box::pin(async_stream::stream! {
            let Some(active) = self.manager.current() else {
                yield ServerMessage::error(mdqa_core::Error::NotReady.to_string());
                return;
            };

            let vector = match self.embedder.embed_one(&question).await {
                Ok(v) => v,
                Err(e) => {
                    yield ServerMessage::error(format!("Error processing query: {e}"));
                    return;
                }
            };

            let hits = match active.search(&vector, self.options.top_k) {
                Ok(h) => h,
                Err(e) => {
                    yield ServerMessage::error(format!("Error processing query: {e}"));
                    return;
                }
            };
            let hits: Vec<(Chunk, f32)> = match self.options.distance_threshold {
                Some(max) => hits.into_iter().filter(|(_, d)| *d <= max).collect(),
                None => hits,
            };

            if hits.is_empty() {
                yield ServerMessage::StreamStart;
                yield ServerMessage::StreamChunk { chunk: NO_CONTENT_ANSWER.to_string() };
                yield ServerMessage::StreamEnd { sources: Vec::new() };
                return;
            }

            let sources = deduplicate_sources(
                hits.iter().map(|(c, _)| c.file_path.clone()).collect(),
            );
            debug!("retrieved {} chunks from {} source file(s)", hits.len(), sources.len());

            let messages = build_messages(&question, &hits);
            let mut deltas = self.chat.stream_chat(messages);

            yield ServerMessage::StreamStart;
            while let Some(delta) = deltas.next().await {
                match delta {
                    ChatDelta::Token(token) => {
                        yield ServerMessage::StreamChunk { chunk: token };
                    }
                    ChatDelta::Done => break,
                    ChatDelta::Error(e) => {
                        yield ServerMessage::StreamChunk {
                            chunk: format!("{ERROR_SENTINEL}{e}"),
                        };
                        break;
                    }
                }
            }
            yield ServerMessage::StreamEnd { sources };
        })
    }
}

/// Fixed system instruction plus retrieved context plus the user question.
fn build_messages(question: &str, hits: &[(Chunk, f32)]) -> Vec<ChatMessage> {
    let context = hits
        .iter()
        .map(|(chunk, _)| {
            let mut part = format!("Source: {}", chunk.file_path);
            if !chunk.headers.is_empty() {
                let trail = chunk
                    .headers
                    .iter()
                    .map(|h| h.title.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
                part.push_str(&format!("\nSection: {trail}"));
            }
            part.push('\n');
            part.push_str(&chunk.text);
            part
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let prompt = format!(
        "You are a helpful assistant that answers questions based on the provided \
         context from markdown documentation files.\n\n\
         Context from documentation:\n{context}\n\n\
         Question: {question}\n\n\
         Please provide a clear and concise answer based on the context above. \
         If the context does not contain enough information to answer the question, \
         say so explicitly. Do not make up information that is not in the context."
    );

    vec![ChatMessage::system("You are a helpful assistant."), ChatMessage::user(prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdqa_core::Heading;

    fn hit(path: &str, text: &str, headers: Vec<Heading>) -> (Chunk, f32) {
        (
            Chunk {
                id: 1,
                file_path: path.into(),
                chunk_index: 0,
                text: text.into(),
                headers,
            },
            0.5,
        )
    }

    #[test]
    fn test_prompt_carries_sources_and_question() {
        let hits = vec![
            hit("/docs/a.md", "Alpha text", vec![]),
            hit(
                "/docs/b.md",
                "Bravo text",
                vec![Heading { level: 1, title: "Guide".into() }],
            ),
        ];
        let messages = build_messages("What is Alpha?", &hits);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        let prompt = &messages[1].content;
        assert!(prompt.contains("Source: /docs/a.md"));
        assert!(prompt.contains("Section: Guide"));
        assert!(prompt.contains("Alpha text"));
        assert!(prompt.contains("Question: What is Alpha?"));
    }
}
