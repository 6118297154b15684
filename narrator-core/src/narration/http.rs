//! Chat-completion narration backend (OpenAI-compatible HTTP API).
//!
//! Text only: the answer is delivered as one transcript part followed by
//! turn complete. Used as the fallback behind a live audio backend.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{NarratorError, Result};
use crate::narration::{NarrationBackend, NarrationResponse};

#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    /// Default: `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    /// Default: `gpt-4o`.
    pub model: String,
    /// Default: 20 s.
    pub timeout: Duration,
}

impl ChatCompletionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: api_key.into(),
            model: "gpt-4o".into(),
            timeout: Duration::from_secs(20),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

pub struct ChatCompletionBackend {
    config: ChatCompletionConfig,
    name: String,
    client: Option<Client>,
}

impl ChatCompletionBackend {
    pub fn new(config: ChatCompletionConfig) -> Self {
        let name = format!("chat:{}", config.model);
        Self {
            config,
            name,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&Client> {
        if self.client.is_none() {
            let client = Client::builder()
                .timeout(self.config.timeout)
                .build()
                .map_err(|e| NarratorError::backend(&self.name, format!("client build: {e}")))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| NarratorError::backend(&self.name, "client unavailable"))
    }
}

impl NarrationBackend for ChatCompletionBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.config.api_key.trim().is_empty() {
            return Err(NarratorError::InvalidConfig(
                "chat-completion backend needs an API key".into(),
            ));
        }
        // Client is built on first use, on the loop thread.
        info!(model = self.config.model.as_str(), "chat-completion backend ready");
        Ok(())
    }

    fn narrate(
        &mut self,
        prompt: &str,
        on_response: &mut dyn FnMut(NarrationResponse),
    ) -> Result<()> {
        let endpoint = self.config.endpoint();
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let api_key = self.config.api_key.clone();
        let name = self.name.clone();

        let response = self
            .client()?
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .map_err(|e| NarratorError::backend(&name, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NarratorError::backend(
                &name,
                format!("non-success status {status}"),
            ));
        }

        let payload: Value = response
            .json()
            .map_err(|e| NarratorError::backend(&name, format!("json parse: {e}")))?;
        let text = completion_text(&payload)
            .ok_or_else(|| NarratorError::backend(&name, "response has no message content"))?;

        debug!(backend = name.as_str(), chars = text.len(), "chat completion received");
        on_response(NarrationResponse::transcript(text));
        on_response(NarrationResponse::turn_complete());
        Ok(())
    }
}

/// `choices[0].message.content`, trimmed, if non-empty.
fn completion_text(payload: &Value) -> Option<String> {
    let text = payload
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
