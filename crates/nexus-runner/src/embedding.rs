//! Text embeddings with a per-text cache.
//!
//! Query phrases such as "What do you think about Ada?" repeat across
//! conversations, so every embedding is cached by its exact text.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, trace};

use crate::config::LlmBackendConfig;
use crate::error::RunnerError;

/// Where embeddings come from.
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi {
        /// Shared HTTP client.
        client: reqwest::Client,
        /// Base API URL.
        api_url: String,
        /// API key.
        api_key: String,
        /// Embedding model.
        model: String,
    },
    /// Bag-of-words feature hashing, for tests and offline runs.
    Hashed {
        /// Vector dimension.
        dimension: usize,
    },
}

/// Embedding client with a text cache.
pub struct Embedder {
    backend: EmbeddingBackend,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl Embedder {
    /// An embedder over `backend`.
    pub fn new(backend: EmbeddingBackend) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// An embedder calling the chat backend's API with `model`.
    pub fn openai(config: &LlmBackendConfig, model: &str) -> Self {
        Self::new(EmbeddingBackend::OpenAi {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: model.to_owned(),
        })
    }

    /// Embed `text`, serving repeats from the cache.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RunnerError> {
        if let Some(cached) = self.cached(text)? {
            trace!(text, "embedding cache hit");
            return Ok(cached);
        }
        let started = Instant::now();
        let embedding = match &self.backend {
            EmbeddingBackend::OpenAi {
                client,
                api_url,
                api_key,
                model,
            } => fetch_openai(client, api_url, api_key, model, text).await?,
            EmbeddingBackend::Hashed { dimension } => hashed_embedding(text, *dimension),
        };
        debug!(
            dimension = embedding.len(),
            latency_ms = started.elapsed().as_millis(),
            "text embedded"
        );
        self.cache
            .lock()
            .map_err(|_poisoned| RunnerError::Embedding("cache lock poisoned".to_owned()))?
            .insert(text.to_owned(), embedding.clone());
        Ok(embedding)
    }

    /// Number of cached texts.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn cached(&self, text: &str) -> Result<Option<Vec<f32>>, RunnerError> {
        Ok(self
            .cache
            .lock()
            .map_err(|_poisoned| RunnerError::Embedding("cache lock poisoned".to_owned()))?
            .get(text)
            .cloned())
    }
}

async fn fetch_openai(
    client: &reqwest::Client,
    api_url: &str,
    api_key: &str,
    model: &str,
    text: &str,
) -> Result<Vec<f32>, RunnerError> {
    let url = format!("{api_url}/embeddings");
    let body = serde_json::json!({"model": model, "input": text});
    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&body)
        .send()
        .await
        .map_err(|e| RunnerError::Embedding(format!("embedding request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_owned());
        return Err(RunnerError::Embedding(format!(
            "embedding endpoint returned {status}: {error_body}"
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| RunnerError::Embedding(format!("embedding response parse failed: {e}")))?;
    extract_embedding(&json)
}

/// Pull `data[0].embedding` out of an embeddings response.
fn extract_embedding(json: &serde_json::Value) -> Result<Vec<f32>, RunnerError> {
    let values = json
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("embedding"))
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| RunnerError::Embedding("response missing data[0].embedding".to_owned()))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(narrow)
                .ok_or_else(|| RunnerError::Embedding("non-numeric embedding value".to_owned()))
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
const fn narrow(value: f64) -> f32 {
    value as f32
}

/// Deterministic feature hashing of lowercase words into `dimension` buckets.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut vector = vec![0.0_f32; dimension];
    let buckets = u64::try_from(dimension).unwrap_or(1);
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        let bucket = hasher.finish().checked_rem(buckets).unwrap_or(0);
        let bucket = usize::try_from(bucket).unwrap_or(0);
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += 1.0;
        }
    }
    vector
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_embedder() -> Embedder {
        Embedder::new(EmbeddingBackend::Hashed { dimension: 32 })
    }

    #[tokio::test]
    async fn repeated_text_is_served_from_cache() {
        let embedder = make_embedder();
        let first = embedder.embed("What do you think about Ada?").await.unwrap();
        let second = embedder.embed("What do you think about Ada?").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.cached_len(), 1);
        embedder.embed("Something else").await.unwrap();
        assert_eq!(embedder.cached_len(), 2);
    }

    #[test]
    fn hashed_embedding_ignores_case_and_punctuation() {
        assert_eq!(
            hashed_embedding("Hello, World!", 16),
            hashed_embedding("hello world", 16)
        );
        assert_eq!(hashed_embedding("", 16), vec![0.0; 16]);
    }

    #[test]
    fn extract_embedding_valid() {
        let json = serde_json::json!({"data": [{"embedding": [0.5, -0.25, 1.0]}]});
        assert_eq!(extract_embedding(&json).unwrap(), vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn extract_embedding_missing_data() {
        let json = serde_json::json!({"error": {"message": "bad key"}});
        assert!(extract_embedding(&json).is_err());
    }
}
