//! LLM backend abstraction and implementations.
//!
//! Defines an enum-based dispatch for chat backends, avoiding the
//! dyn-compatibility issues with async trait methods. Concrete
//! implementations exist for OpenAI-compatible APIs and the Anthropic
//! Messages API. Both speak HTTP via `reqwest`.
//!
//! A request is a list of chat messages plus optional stop words and
//! callable functions; a completion is the reply text and, when the model
//! chose one, a function call.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BackendType, LlmBackendConfig};
use crate::error::RunnerError;

/// Role of one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions framing the conversation.
    System,
    /// The prompt.
    User,
    /// A previous model reply.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking.
    pub role: Role,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A function the model may call instead of, or alongside, replying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// What the function does.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

/// A chat completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    /// Conversation so far, system message first.
    pub messages: Vec<ChatMessage>,
    /// Reply length cap.
    pub max_tokens: u32,
    /// Sequences that end the reply.
    pub stop: Vec<String>,
    /// Functions offered to the model.
    pub functions: Vec<FunctionSpec>,
}

/// A function call chosen by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

/// The model's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Reply text, empty when the model only called a function.
    pub text: String,
    /// Function call, if any.
    pub function_call: Option<FunctionCall>,
}

// ---------------------------------------------------------------------------
// Unified backend enum (dyn-compatible alternative to async trait)
// ---------------------------------------------------------------------------

/// A chat backend.
///
/// Uses enum dispatch instead of trait objects because async methods
/// are not dyn-compatible in Rust.
pub enum LlmBackend {
    /// OpenAI-compatible chat completions API.
    OpenAi(OpenAiBackend),
    /// Anthropic Messages API.
    Anthropic(AnthropicBackend),
    /// Canned completions, for tests and offline runs.
    Scripted(ScriptedBackend),
}

impl LlmBackend {
    /// Send a request and return the completion.
    ///
    /// `call_type` names the caller in the latency log.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::LlmBackend`] if the HTTP call fails or the
    /// response cannot be extracted.
    pub async fn complete(
        &self,
        call_type: &str,
        request: &ChatRequest,
    ) -> Result<Completion, RunnerError> {
        let started = Instant::now();
        let completion = match self {
            Self::OpenAi(backend) => backend.complete(request).await,
            Self::Anthropic(backend) => backend.complete(request).await,
            Self::Scripted(backend) => backend.complete(request),
        }?;
        debug!(
            call_type,
            backend = self.name(),
            latency_ms = started.elapsed().as_millis(),
            function_call = completion.function_call.as_ref().map(|c| c.name.as_str()),
            "llm call finished"
        );
        Ok(completion)
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::OpenAi(_) => "openai-compatible",
            Self::Anthropic(_) => "anthropic",
            Self::Scripted(_) => "scripted",
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible backend
// ---------------------------------------------------------------------------

/// Backend for OpenAI-compatible chat completions APIs.
///
/// Sends requests to `{api_url}/chat/completions`. Functions are offered
/// as tools.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    /// Create a new `OpenAI`-compatible backend.
    pub fn new(config: &LlmBackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, RunnerError> {
        let url = format!("{}/chat/completions", self.api_url);
        let body = openai_body(&self.model, request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RunnerError::LlmBackend(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(RunnerError::LlmBackend(format!(
                "OpenAI returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RunnerError::LlmBackend(format!("OpenAI response parse failed: {e}")))?;

        extract_openai_completion(&json)
    }
}

fn openai_body(model: &str, request: &ChatRequest) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("model".to_owned(), serde_json::json!(model));
    body.insert("messages".to_owned(), serde_json::json!(request.messages));
    body.insert("max_tokens".to_owned(), serde_json::json!(request.max_tokens));
    if !request.stop.is_empty() {
        body.insert("stop".to_owned(), serde_json::json!(request.stop));
    }
    if !request.functions.is_empty() {
        let tools: Vec<serde_json::Value> = request
            .functions
            .iter()
            .map(|f| serde_json::json!({"type": "function", "function": f}))
            .collect();
        body.insert("tools".to_owned(), serde_json::Value::Array(tools));
    }
    serde_json::Value::Object(body)
}

/// Extract the text and optional tool call from an `OpenAI` response.
fn extract_openai_completion(json: &serde_json::Value) -> Result<Completion, RunnerError> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| {
            RunnerError::LlmBackend("OpenAI response missing choices[0].message".to_owned())
        })?;
    let text = message
        .get("content")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let function_call = message
        .get("tool_calls")
        .and_then(|calls| calls.get(0))
        .and_then(|call| call.get("function"))
        .and_then(|f| {
            Some(FunctionCall {
                name: f.get("name")?.as_str()?.to_owned(),
                arguments: f
                    .get("arguments")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("{}")
                    .to_owned(),
            })
        });
    if text.is_empty() && function_call.is_none() {
        return Err(RunnerError::LlmBackend(
            "OpenAI response has neither content nor a tool call".to_owned(),
        ));
    }
    Ok(Completion {
        text,
        function_call,
    })
}

// ---------------------------------------------------------------------------
// Anthropic Messages API backend
// ---------------------------------------------------------------------------

/// Backend for the Anthropic Messages API.
///
/// Anthropic uses a different request format from `OpenAI`:
/// - Uses `x-api-key` header instead of `Authorization: Bearer`
/// - System text is a top-level field, not a message
/// - Functions are `tools` with an `input_schema`, and calls come back as
///   `tool_use` content blocks
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicBackend {
    /// Create a new Anthropic Messages API backend.
    pub fn new(config: &LlmBackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, RunnerError> {
        let url = format!("{}/messages", self.api_url);
        let body = anthropic_body(&self.model, request);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RunnerError::LlmBackend(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(RunnerError::LlmBackend(format!(
                "Anthropic returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                RunnerError::LlmBackend(format!("Anthropic response parse failed: {e}"))
            })?;

        extract_anthropic_completion(&json)
    }
}

fn anthropic_body(model: &str, request: &ChatRequest) -> serde_json::Value {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let messages: Vec<&ChatMessage> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let mut body = serde_json::Map::new();
    body.insert("model".to_owned(), serde_json::json!(model));
    body.insert("max_tokens".to_owned(), serde_json::json!(request.max_tokens));
    if messages.is_empty() {
        // The Messages API needs at least one turn.
        let opening = ChatMessage::user(system.join("\n\n"));
        body.insert("messages".to_owned(), serde_json::json!([opening]));
    } else {
        body.insert("system".to_owned(), serde_json::json!(system.join("\n\n")));
        body.insert("messages".to_owned(), serde_json::json!(messages));
    }
    if !request.stop.is_empty() {
        body.insert("stop_sequences".to_owned(), serde_json::json!(request.stop));
    }
    if !request.functions.is_empty() {
        let tools: Vec<serde_json::Value> = request
            .functions
            .iter()
            .map(|f| {
                serde_json::json!({
                    "name": f.name,
                    "description": f.description,
                    "input_schema": f.parameters,
                })
            })
            .collect();
        body.insert("tools".to_owned(), serde_json::Value::Array(tools));
    }
    serde_json::Value::Object(body)
}

/// Extract text blocks and the first `tool_use` block from an Anthropic
/// response.
fn extract_anthropic_completion(json: &serde_json::Value) -> Result<Completion, RunnerError> {
    let blocks = json
        .get("content")
        .and_then(serde_json::Value::as_array)
        .filter(|blocks| !blocks.is_empty())
        .ok_or_else(|| {
            RunnerError::LlmBackend("Anthropic response missing content blocks".to_owned())
        })?;
    let mut completion = Completion::default();
    for block in blocks {
        match block.get("type").and_then(serde_json::Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(serde_json::Value::as_str) {
                    completion.text.push_str(text);
                }
            }
            Some("tool_use") if completion.function_call.is_none() => {
                if let Some(name) = block.get("name").and_then(serde_json::Value::as_str) {
                    let arguments = block
                        .get("input")
                        .map_or_else(|| "{}".to_owned(), ToString::to_string);
                    completion.function_call = Some(FunctionCall {
                        name: name.to_owned(),
                        arguments,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(completion)
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// Backend that replays queued completions and records requests.
///
/// When the queue is empty it answers with the fallback text.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    queue: Mutex<VecDeque<Completion>>,
    requests: Mutex<Vec<ChatRequest>>,
    fallback: String,
}

impl ScriptedBackend {
    /// A backend answering `fallback` once its queue runs dry.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            ..Self::default()
        }
    }

    /// Queue a plain text reply.
    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Completion {
            text: text.into(),
            function_call: None,
        });
    }

    /// Queue a completion.
    pub fn push(&self, completion: Completion) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(completion);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn complete(&self, request: &ChatRequest) -> Result<Completion, RunnerError> {
        self.requests
            .lock()
            .map_err(|_poisoned| RunnerError::LlmBackend("script lock poisoned".to_owned()))?
            .push(request.clone());
        let next = self
            .queue
            .lock()
            .map_err(|_poisoned| RunnerError::LlmBackend("script lock poisoned".to_owned()))?
            .pop_front();
        Ok(next.unwrap_or_else(|| Completion {
            text: self.fallback.clone(),
            function_call: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create an LLM backend from configuration.
pub fn create_backend(config: &LlmBackendConfig) -> LlmBackend {
    match config.backend_type {
        BackendType::OpenAi => LlmBackend::OpenAi(OpenAiBackend::new(config)),
        BackendType::Anthropic => LlmBackend::Anthropic(AnthropicBackend::new(config)),
    }
}
