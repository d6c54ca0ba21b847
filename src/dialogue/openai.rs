//! OpenAI-compatible chat completions.
//!
//! POST `{endpoint}` with `{model, messages, max_tokens, temperature, ...}`,
//! reads `choices[0].message.content`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ChatMessage, CompletionBackend};
use crate::config::CompletionSettings;
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiCompletion {
    api_key: String,
    settings: CompletionSettings,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    pub fn new(api_key: &str, settings: CompletionSettings) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            settings,
            client,
        })
    }

    /// Build from settings; `None` without an API key.
    pub fn from_settings(settings: &CompletionSettings) -> SessionResult<Option<Self>> {
        match settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Self::new(key, settings.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.settings.model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            presence_penalty: self.settings.presence_penalty,
            frequency_penalty: self.settings.frequency_penalty,
        }
    }

    async fn request(&self, messages: &[ChatMessage]) -> SessionResult<String> {
        info!(model = %self.settings.model, messages = messages.len(), "Completion request");

        let resp = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::BackendUnavailable(format!(
                "Completion API error {}: {}",
                status, body
            )));
        }

        let body = resp.text().await?;
        parse_completion(&body)
    }
}

/// Extract the first choice's content.
fn parse_completion(body: &str) -> SessionResult<String> {
    let parsed: CompletionResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| SessionError::BackendUnavailable("Completion had no content".into()))
}

impl CompletionBackend for OpenAiCompletion {
    fn complete<'a>(&'a self, messages: &'a [ChatMessage]) -> BoxFuture<'a, SessionResult<String>> {
        self.request(messages).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let backend = OpenAiCompletion::new("sk-test", CompletionSettings::default()).unwrap();
        let messages = vec![ChatMessage::system("Be brief."), ChatMessage::user("Hi")];
        let value = serde_json::to_value(backend.request_body(&messages)).unwrap();
        assert_eq!(value["model"], "gpt-4");
        assert_eq!(value["max_tokens"], 100);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "Hi");
        assert!((value["temperature"].as_f64().unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"  Why Rust?  "}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Why Rust?");
    }

    #[test]
    fn test_parse_completion_rejects_missing_fields() {
        for body in [
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"message":{"content":"   "}}]}"#,
            r#"{"error":{"message":"bad key"}}"#,
        ] {
            let err = parse_completion(body).unwrap_err();
            assert!(matches!(err, SessionError::BackendUnavailable(_)), "{body}");
        }
    }

    #[test]
    fn test_from_settings_without_key() {
        assert!(OpenAiCompletion::from_settings(&CompletionSettings::default())
            .unwrap()
            .is_none());
    }
}
