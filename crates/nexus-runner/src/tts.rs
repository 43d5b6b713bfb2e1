//! Text-to-speech for messages a human can hear.
//!
//! Speech is synthesized only when a human is in a message's audience.
//! Clips live in an [`AudioStore`] under an `audio/{message_id}` reference
//! that is attached to the message and pushed to eavesdropper feeds.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use nexus_types::MessageId;
use tracing::debug;

use crate::config::SpeechConfig;
use crate::error::RunnerError;

/// A speech synthesizer.
pub enum SpeechClient {
    /// OpenAI-style `POST {url}` with `{model, input, voice}`.
    Http {
        /// Shared HTTP client.
        client: reqwest::Client,
        /// Endpoint settings.
        config: SpeechConfig,
    },
    /// Returns the UTF-8 bytes of `"{voice}: {text}"`, for tests.
    Echo,
}

impl SpeechClient {
    /// An HTTP synthesizer.
    pub fn http(config: SpeechConfig) -> Self {
        Self::Http {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Synthesize `text`, falling back to the default voice.
    pub async fn speak(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, RunnerError> {
        match self {
            Self::Http { client, config } => {
                let voice = voice.unwrap_or(&config.default_voice);
                let started = Instant::now();
                let body = serde_json::json!({
                    "model": "tts-1",
                    "input": text,
                    "voice": voice,
                });
                let response = client
                    .post(&config.api_url)
                    .header("Authorization", format!("Bearer {}", config.api_key))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| RunnerError::Speech(format!("speech request failed: {e}")))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(RunnerError::Speech(format!(
                        "speech endpoint returned {status}"
                    )));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| RunnerError::Speech(format!("speech body failed: {e}")))?;
                debug!(
                    voice,
                    bytes = bytes.len(),
                    latency_ms = started.elapsed().as_millis(),
                    "speech synthesized"
                );
                Ok(bytes.to_vec())
            }
            Self::Echo => Ok(format!("{}: {text}", voice.unwrap_or("default")).into_bytes()),
        }
    }
}

/// In-memory audio clips keyed by reference.
#[derive(Debug, Default)]
pub struct AudioStore {
    clips: Mutex<HashMap<String, Vec<u8>>>,
}

impl AudioStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the clip of a message and return its reference.
    pub fn put(&self, message_id: MessageId, clip: Vec<u8>) -> Result<String, RunnerError> {
        let reference = format!("audio/{message_id}");
        self.clips
            .lock()
            .map_err(|_poisoned| RunnerError::Speech("audio store lock poisoned".to_owned()))?
            .insert(reference.clone(), clip);
        Ok(reference)
    }

    /// Fetch a clip by reference.
    pub fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.clips.lock().ok()?.get(reference).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stored_clip_is_found_by_reference() {
        let speech = SpeechClient::Echo;
        let clip = speech.speak("Hello.", Some("nova")).await.unwrap();
        let store = AudioStore::new();
        let reference = store.put(MessageId(4), clip).unwrap();
        assert_eq!(reference, format!("audio/{}", MessageId(4)));
        assert_eq!(store.get(&reference).unwrap(), b"nova: Hello.".to_vec());
        assert!(store.get("audio/missing").is_none());
    }
}
