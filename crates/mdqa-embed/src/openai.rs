//! OpenAI-compatible API clients: batch embeddings with retry and a
//! streaming chat completion reader (SSE).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use mdqa_core::{ApiConfig, Error, Result};

use crate::cache::EmbeddingCache;
use crate::types::{BoxedDeltaStream, ChatDelta, ChatMessage, Embedder};

/// Uncached texts are sent to the API in batches of this size.
const EMBED_BATCH_SIZE: usize = 32;
const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))
}

fn validate_api(api: &ApiConfig) -> Result<()> {
    if api.base_url.trim().is_empty() {
        return Err(Error::ApiConfig("api.base_url is empty".into()));
    }
    if api.api_key.trim().is_empty() {
        return Err(Error::ApiConfig("api.api_key is empty".into()));
    }
    Ok(())
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

/// Exponential backoff delay for `attempt` (1-based), with ±20% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.as_secs_f64() * f64::from(1u32 << (attempt - 1));
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_secs_f64(base * jitter)
}

enum CallError {
    /// 429, 5xx, or transport failure: worth retrying.
    Retryable(String),
    /// Anything else: surface immediately.
    Terminal(Error),
}

// ---------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Embedding client over `POST {base}/embeddings` with a content-hash cache
/// in front of every call.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    cache: Arc<EmbeddingCache>,
}

impl OpenAiEmbedder {
    pub fn new(api: &ApiConfig, cache: Arc<EmbeddingCache>) -> Result<Self> {
        validate_api(api)?;
        Ok(Self {
            client: build_client()?,
            base_url: api.base_url.clone(),
            api_key: api.api_key.clone(),
            model: api.embedding_model.clone(),
            cache,
        })
    }

    async fn call_api(&self, inputs: &[&str]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        let body = json!({ "model": self.model, "input": inputs });
        let response = self
            .client
            .post(endpoint(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(CallError::Retryable(format!("API returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Terminal(Error::ApiTransport(format!(
                "embedding API returned {status}: {body}"
            ))));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CallError::Terminal(Error::ApiProtocol(format!("malformed embedding response: {e}"))))?;
        if parsed.data.len() != inputs.len() {
            return Err(CallError::Terminal(Error::ApiProtocol(format!(
                "embedding response has {} vectors for {} inputs",
                parsed.data.len(),
                inputs.len()
            ))));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    /// One batch with exponential backoff on 429/5xx/transport errors.
    async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut last = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.call_api(inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(CallError::Terminal(e)) => return Err(e),
                Err(CallError::Retryable(reason)) => {
                    last = reason;
                    if attempt < MAX_ATTEMPTS {
                        let delay = backoff_delay(attempt);
                        warn!(
                            "embedding attempt {attempt}/{MAX_ATTEMPTS} failed ({last}), retrying in {:.1}s",
                            delay.as_secs_f64()
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(Error::ApiTransport(format!(
            "embedding request failed after {MAX_ATTEMPTS} attempts: {last}"
        )))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    /// Embed texts in input order, consulting the cache before the API.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> =
            texts.iter().map(|t| self.cache.get(t)).collect();

        let missing: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        if !missing.is_empty() {
            debug!(
                "embedding {} of {} texts ({} cache hits)",
                missing.len(),
                texts.len(),
                texts.len() - missing.len()
            );
        }

        for batch in missing.chunks(EMBED_BATCH_SIZE) {
            let inputs: Vec<&str> = batch.iter().map(|&i| texts[i].as_str()).collect();
            let vectors = self.embed_batch(&inputs).await?;
            for (&i, vector) in batch.iter().zip(vectors) {
                self.cache.put(&texts[i], vector.clone());
                results[i] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("all slots filled")).collect())
    }
}

// ---------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------

/// Streaming chat client over `POST {base}/chat/completions` with
/// `stream: true`, reading SSE lines from the response body.
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        validate_api(api)?;
        Ok(Self {
            client: build_client()?,
            base_url: api.base_url.clone(),
            api_key: api.api_key.clone(),
            model: api.llm_model.clone(),
        })
    }
}

impl crate::types::ChatModel for OpenAiChat {
    fn stream_chat(&self, messages: Vec<ChatMessage>) -> BoxedDeltaStream {
        let client = self.client.clone();
        let url = endpoint(&self.base_url, "chat/completions");
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        Box::pin(async_stream::stream! {
            let body = json!({
                "model": model,
                "messages": messages,
                "temperature": 0.7,
                "max_tokens": 500,
                "stream": true,
            });

            debug!("streaming chat completion from {url} with model {model}");

            let response = match client
                .post(&url)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield ChatDelta::Error(format!("request failed: {e}"));
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                yield ChatDelta::Error(format!("API error {status}: {body}"));
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield ChatDelta::Error(format!("stream read error: {e}"));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete SSE lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    if let Some(data) = line.strip_prefix("data: ") {
                        if data.trim() == "[DONE]" {
                            yield ChatDelta::Done;
                            return;
                        }

                        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) {
                            if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str() {
                                if !content.is_empty() {
                                    yield ChatDelta::Token(content.to_string());
                                }
                            }
                        }
                    }
                }
            }

            yield ChatDelta::Done;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join_strips_trailing_slash() {
        assert_eq!(
            endpoint("https://api.example.com/v1/", "embeddings"),
            "https://api.example.com/v1/embeddings"
        );
        assert_eq!(
            endpoint("https://api.example.com/v1", "chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_empty_key_is_config_error() {
        let api = ApiConfig {
            base_url: "https://api.example.com".into(),
            api_key: "  ".into(),
            embedding_model: "m".into(),
            llm_model: "m".into(),
        };
        let cache = Arc::new(EmbeddingCache::new(std::env::temp_dir()));
        assert!(matches!(
            OpenAiEmbedder::new(&api, cache),
            Err(Error::ApiConfig(_))
        ));
    }

    #[test]
    fn test_embedding_response_shape() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"model":"text-embedding-3-small"}"#,
        )
        .unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_embed_many_serves_cache_hits_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(EmbeddingCache::new(dir.path().to_path_buf()));
        cache.put("alpha", vec![1.0]);
        cache.put("bravo", vec![2.0]);

        // Unreachable endpoint: any API call would fail, so a success proves
        // every text was served from the cache.
        let api = ApiConfig {
            base_url: "http://localhost:1".into(),
            api_key: "k".into(),
            embedding_model: "m".into(),
            llm_model: "m".into(),
        };
        let embedder = OpenAiEmbedder::new(&api, cache).unwrap();
        let vectors = embedder
            .embed_many(&["alpha".to_string(), "bravo".to_string(), "alpha".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![1.0]]);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let first = backoff_delay(1);
        let third = backoff_delay(3);
        assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1200));
        assert!(third >= Duration::from_millis(3200) && third <= Duration::from_millis(4800));
    }
}
