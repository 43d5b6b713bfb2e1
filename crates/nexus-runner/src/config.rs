//! Configuration types for the operation runner.
//!
//! All configuration is loaded from environment variables. The runner needs
//! to know which LLM backend to use (URL, API key, model), which embedding
//! model to call, and optionally where to synthesize speech.

use std::time::Duration;

use crate::error::RunnerError;

/// Complete runner configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Chat completion backend.
    pub llm: LlmBackendConfig,
    /// Embedding model served by the same API as the chat backend.
    pub embedding_model: String,
    /// Text-to-speech endpoint, when speech is enabled.
    pub speech: Option<SpeechConfig>,
    /// Deadline for one operation, model calls included.
    pub operation_timeout: Duration,
    /// Maximum number of concurrent operations.
    pub max_concurrent_calls: usize,
    /// Path to the templates directory.
    pub templates_dir: String,
}

/// Configuration for the chat completion backend.
#[derive(Debug, Clone)]
pub struct LlmBackendConfig {
    /// The backend type (openai, anthropic, ollama).
    pub backend_type: BackendType,
    /// Base API URL (e.g. `https://api.openai.com/v1`).
    pub api_url: String,
    /// API key for authentication.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
}

/// Configuration for the text-to-speech endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechConfig {
    /// Full URL of the synthesis endpoint.
    pub api_url: String,
    /// API key for authentication.
    pub api_key: String,
    /// Voice used when the speaker has none.
    pub default_voice: String,
}

/// Supported LLM backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// `OpenAI`-compatible API (works with `OpenAI`, `DeepSeek`, Ollama).
    OpenAi,
    /// Anthropic Messages API (different request format).
    Anthropic,
}

impl RunnerConfig {
    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - `LLM_API_KEY` -- chat and embedding API key
    ///
    /// Optional variables:
    /// - `LLM_BACKEND` -- backend type (default `openai`)
    /// - `LLM_API_URL` -- API base URL (default `https://api.openai.com/v1`)
    /// - `LLM_MODEL` -- chat model (default `gpt-4o-mini`)
    /// - `EMBEDDING_MODEL` -- embedding model (default `text-embedding-3-small`)
    /// - `TTS_API_URL` / `TTS_API_KEY` -- speech endpoint; speech is off
    ///   unless both are set
    /// - `TTS_DEFAULT_VOICE` -- fallback voice (default `alloy`)
    /// - `OPERATION_TIMEOUT_MS` -- operation deadline (default 60000)
    /// - `MAX_CONCURRENT_CALLS` -- max parallel operations (default 8)
    /// - `TEMPLATES_DIR` -- path to prompt templates (default `templates`)
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("LLM_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RunnerError::Config("missing required env var LLM_API_KEY".to_owned()))?;
        let backend_type = parse_backend(
            &lookup("LLM_BACKEND").unwrap_or_else(|| "openai".to_owned()),
        )?;
        let api_url =
            lookup("LLM_API_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_owned());
        let model = lookup("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_owned());
        let embedding_model =
            lookup("EMBEDDING_MODEL").unwrap_or_else(|| "text-embedding-3-small".to_owned());

        let speech = match (lookup("TTS_API_URL"), lookup("TTS_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(SpeechConfig {
                api_url,
                api_key,
                default_voice: lookup("TTS_DEFAULT_VOICE").unwrap_or_else(|| "alloy".to_owned()),
            }),
            _ => None,
        };

        let operation_timeout_ms: u64 = lookup("OPERATION_TIMEOUT_MS")
            .unwrap_or_else(|| "60000".to_owned())
            .parse()
            .map_err(|e| RunnerError::Config(format!("invalid OPERATION_TIMEOUT_MS: {e}")))?;

        let max_concurrent_calls: usize = lookup("MAX_CONCURRENT_CALLS")
            .unwrap_or_else(|| "8".to_owned())
            .parse()
            .map_err(|e| RunnerError::Config(format!("invalid MAX_CONCURRENT_CALLS: {e}")))?;

        let templates_dir = lookup("TEMPLATES_DIR").unwrap_or_else(|| "templates".to_owned());

        Ok(Self {
            llm: LlmBackendConfig {
                backend_type,
                api_url,
                api_key,
                model,
            },
            embedding_model,
            speech,
            operation_timeout: Duration::from_millis(operation_timeout_ms),
            max_concurrent_calls,
            templates_dir,
        })
    }
}

fn parse_backend(raw: &str) -> Result<BackendType, RunnerError> {
    match raw.to_lowercase().as_str() {
        "openai" | "deepseek" | "ollama" => Ok(BackendType::OpenAi),
        "anthropic" | "claude" => Ok(BackendType::Anthropic),
        other => Err(RunnerError::Config(format!("unknown backend type: {other}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn make_lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let result = RunnerConfig::from_lookup(make_lookup(&[("LLM_MODEL", "m")]));
        assert!(matches!(result, Err(RunnerError::Config(_))));
        let blank = RunnerConfig::from_lookup(make_lookup(&[("LLM_API_KEY", "  ")]));
        assert!(blank.is_err());
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let config = RunnerConfig::from_lookup(make_lookup(&[("LLM_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.llm.backend_type, BackendType::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.operation_timeout, Duration::from_secs(60));
        assert!(config.speech.is_none());
    }

    #[test]
    fn speech_needs_both_url_and_key() {
        let config = RunnerConfig::from_lookup(make_lookup(&[
            ("LLM_API_KEY", "sk-test"),
            ("LLM_BACKEND", "Claude"),
            ("TTS_API_URL", "https://tts.example/v1/speech"),
            ("TTS_API_KEY", "tts-key"),
        ]))
        .unwrap();
        assert_eq!(config.llm.backend_type, BackendType::Anthropic);
        assert_eq!(
            config.speech.map(|s| s.default_voice),
            Some(String::from("alloy"))
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = RunnerConfig::from_lookup(make_lookup(&[
            ("LLM_API_KEY", "sk-test"),
            ("LLM_BACKEND", "carrier-pigeon"),
        ]));
        assert!(result.is_err());
    }
}
