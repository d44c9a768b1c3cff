//! OpenAI-compatible chat and embeddings client.
//!
//! Works against any server exposing `POST /chat/completions` and
//! `POST /embeddings` under a common root, e.g. Ollama's
//! `http://localhost:11434/v1`. Calls are not retried.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
}

impl LlmClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Sends one chat completion and returns the first choice, trimmed.
    pub async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let json = self
            .post_json("chat/completions", &ChatRequest { model, messages })
            .await?;
        let response: ChatResponse =
            serde_json::from_value(json).context("Invalid chat response")?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Invalid chat response: no choices"))?;
        Ok(choice.message.content.trim().to_string())
    }

    /// Embeds `texts`, returning vectors in input order.
    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let json = self
            .post_json("embeddings", &EmbeddingRequest { model, input: texts })
            .await?;
        parse_embeddings(json, texts.len())
    }

    /// Embeds a single text.
    pub async fn embed_one(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        self.embed(model, &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("LLM connection error (is the server running at {}?)", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("{} API error {}: {}", path, status, body_text);
        }
        Ok(response.json().await?)
    }
}

fn parse_embeddings(json: serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbeddingResponse =
        serde_json::from_value(json).context("Invalid embeddings response")?;
    if response.data.len() != expected {
        bail!(
            "Invalid embeddings response: expected {} vectors, got {}",
            expected,
            response.data.len()
        );
    }
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}
