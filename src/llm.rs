// src/llm.rs
use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

pub const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: Option<&str>, turns: &[ChatTurn]) -> Result<String>;
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: GEMINI_BASE.to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, system: Option<&str>, turns: &[ChatTurn]) -> Result<String> {
        let contents: Vec<_> = turns
            .iter()
            .map(|t| {
                let role = match t.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({ "role": role, "parts": [{ "text": t.content }] })
            })
            .collect();

        let mut body = json!({ "contents": contents, "generationConfig": { "temperature": 0.2 } });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, turns = turns.len(), "calling Gemini");

        let resp = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(eyre!("Gemini error: HTTP {}: {}", status, text));
        }

        let parsed: GenerateResponse = resp.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(eyre!("Gemini returned no text"));
        }
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Replays canned answers in order and records every prompt.
    pub(crate) struct ScriptedLlm {
        answers: Mutex<Vec<String>>,
        pub prompts: Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl ScriptedLlm {
        pub(crate) fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedLlm {
        async fn generate(&self, _system: Option<&str>, turns: &[ChatTurn]) -> Result<String> {
            self.prompts.lock().unwrap().push(turns.to_vec());
            self.answers
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| eyre!("no scripted answer left"))
        }
    }

    #[tokio::test]
    async fn gemini_joins_text_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/test-model:generateContent"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "role": "model", "parts": [{ "text": "SELECT " }, { "text": "1" }] } }]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("k", "test-model", Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let out = client
            .generate(Some("be terse"), &[ChatTurn::user("one")])
            .await
            .unwrap();
        assert_eq!(out, "SELECT 1");
    }

    #[tokio::test]
    async fn gemini_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key invalid"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("bad", "m", Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let err = client.generate(None, &[ChatTurn::user("hi")]).await.unwrap_err();
        assert!(err.to_string().contains("API key invalid"));
    }
}
