//! Text summarization for spoken notifications.
//!
//! Turns an agent response or a permission request into one or two short
//! sentences suitable for text-to-speech. Two back ends:
//! - `OllamaSummarizer`: local Ollama `/api/generate`
//! - `GroqSummarizer`: Groq's OpenAI-compatible chat completions API

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use crate::config::{SummarizerBackend, SummarizerConfig};
use crate::error::{Result, SpeakerError};
use crate::pipeline::{RequestMetadata, SummaryKind};

const SHORT_RESPONSE_PROMPT: &str = r#"Summarize what the coding assistant just said in one short sentence suitable for text-to-speech. Be conversational. Output ONLY the summary, nothing else.

Response:
{text}

Summary:"#;

const LONG_RESPONSE_PROMPT: &str = r#"The coding assistant finished a task. Summarize what it did and anything it needs from the user in 1-2 short sentences suitable for text-to-speech. Skip file paths, code and tool details unless essential. Output ONLY the summary, nothing else.

Transcript:
{text}

Summary:"#;

const PERMISSION_PROMPT: &str = r#"The coding assistant is asking permission to use the tool "{tool}". Turn this into one short spoken question asking the user to approve it, mentioning what it wants to do. Output ONLY the question, nothing else.

Request:
{text}

Question:"#;

/// Cap on characters sent to the model.
const MAX_INPUT_CHARS: usize = 24_000;

/// Input to a summarization call.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub content: &'a str,
    pub kind: SummaryKind,
    pub metadata: Option<&'a RequestMetadata>,
}

/// Result of a summarization call.
#[derive(Debug, Clone)]
pub struct Summary {
    pub text: String,
    pub model: String,
    pub latency_ms: f64,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary>;

    /// Whether the back end is reachable.
    async fn health_check(&self) -> bool;
}

/// Build the configured summarizer.
pub fn from_config(config: &SummarizerConfig) -> Result<Box<dyn Summarizer>> {
    Ok(match config.backend {
        SummarizerBackend::Ollama => Box::new(OllamaSummarizer::new(config)?),
        SummarizerBackend::Groq => Box::new(GroqSummarizer::new(config)?),
    })
}

/// Fill the prompt template for `request`.
pub fn build_prompt(request: &SummaryRequest<'_>) -> String {
    let input = truncate_chars(request.content.trim(), MAX_INPUT_CHARS);
    match request.kind {
        SummaryKind::ShortResponse => SHORT_RESPONSE_PROMPT.replace("{text}", input),
        SummaryKind::LongResponse => LONG_RESPONSE_PROMPT.replace("{text}", input),
        SummaryKind::PermissionRequest => {
            let tool = match request.metadata {
                Some(RequestMetadata::Permission { tool_name }) => tool_name.as_str(),
                None => "a tool",
            };
            PERMISSION_PROMPT
                .replace("{tool}", tool)
                .replace("{text}", input)
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn finish(text: &str, model: &str, content_len: usize, start: Instant) -> Result<Summary> {
    let text = text.trim();
    let latency_ms = ms_since(start);
    if text.is_empty() {
        return Err(SpeakerError::Summarize(format!("{model} returned an empty summary")));
    }
    info!(
        "Summarized {content_len} chars → {} chars with {model} ({latency_ms:.0}ms)",
        text.len()
    );
    Ok(Summary {
        text: text.to_string(),
        model: model.to_string(),
        latency_ms,
    })
}

pub struct OllamaSummarizer {
    model_large: String,
    model_small: String,
    host: String,
    client: Client,
}

impl OllamaSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        Ok(Self {
            model_large: config.ollama_model_large.clone(),
            model_small: config.ollama_model_small.clone(),
            host: config.ollama_url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn model_for(&self, kind: SummaryKind) -> &str {
        match kind {
            SummaryKind::LongResponse => &self.model_large,
            SummaryKind::ShortResponse | SummaryKind::PermissionRequest => &self.model_small,
        }
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary> {
        let t_start = Instant::now();
        let model = self.model_for(request.kind);

        let body = json!({
            "model": model,
            "prompt": build_prompt(&request),
            "stream": false,
            "options": {
                "temperature": 0.3,
                "num_predict": 200
            }
        });

        debug!("Ollama summarize with {model} ({:?})", request.kind);
        let resp = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SpeakerError::Summarize(format!(
                "Ollama returned status {}",
                resp.status()
            )));
        }

        let data: serde_json::Value = resp.json().await?;
        let text = data["response"].as_str().unwrap_or("");
        finish(text, model, request.content.len(), t_start)
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}

const GROQ_API: &str = "https://api.groq.com/openai/v1";

pub struct GroqSummarizer {
    model_large: String,
    model_small: String,
    api_key: String,
    base_url: String,
    client: Client,
}

impl GroqSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let api_key = config
            .groq_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SpeakerError::Config("summarizer.groq_api_key is required".into()))?;

        Ok(Self {
            model_large: config.groq_model_large.clone(),
            model_small: config.groq_model_small.clone(),
            api_key,
            base_url: GROQ_API.to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn model_for(&self, kind: SummaryKind) -> &str {
        match kind {
            SummaryKind::LongResponse => &self.model_large,
            SummaryKind::ShortResponse | SummaryKind::PermissionRequest => &self.model_small,
        }
    }
}

#[async_trait]
impl Summarizer for GroqSummarizer {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary> {
        let t_start = Instant::now();
        let model = self.model_for(request.kind);

        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": build_prompt(&request) }],
            "temperature": 0.3,
            "max_tokens": 200
        });

        debug!("Groq summarize with {model} ({:?})", request.kind);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SpeakerError::Summarize(format!(
                "Groq returned status {}",
                resp.status()
            )));
        }

        let data: serde_json::Value = resp.json().await?;
        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        finish(text, model, request.content.len(), t_start)
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}
