// src/llm/client.rs

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::llm::decode::decode_text;
use crate::llm::prompt::GenerationRequest;

const PROMPT_ABI_VERSION: &str = "v1-testsmith";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a generation call produced no text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationFailure {
    #[error("generation service timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

pub type GenerationResult = Result<String, GenerationFailure>;

/// A text-generation service: one prompt in, one text blob (or a failure) out.
pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> GenerationResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    #[value(name = "openai")]
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-1.5-flash",
            Provider::OpenAI => "gpt-5.2",
            Provider::Anthropic => "claude-3-5-sonnet-latest",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::Gemini => "gemini",
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

pub struct LlmClient {
    cfg: ProviderConfig,
    http: reqwest::blocking::Client,
}

impl LlmClient {
    pub fn new(cfg: ProviderConfig) -> Result<Self, GenerationFailure> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GenerationFailure::Transport(e.to_string()))?;

        Ok(Self { cfg, http })
    }
}

impl TextGenerator for LlmClient {
    fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let (url, headers, body) = build_request(&self.cfg, &request.prompt);

        let mut req = self.http.post(url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if self.cfg.provider == Provider::Gemini {
            req = req.query(&[("key", self.cfg.api_key.as_str())]);
        }

        let resp = req.send().map_err(transport_failure)?;
        let status = resp.status();
        let text = resp.text().map_err(transport_failure)?;

        if !status.is_success() {
            return Err(GenerationFailure::Transport(format!(
                "status {}: {}",
                status,
                text.chars().take(300).collect::<String>()
            )));
        }

        decode_text(self.cfg.provider, &text)
    }
}

fn transport_failure(e: reqwest::Error) -> GenerationFailure {
    if e.is_timeout() {
        GenerationFailure::Timeout
    } else {
        GenerationFailure::Transport(e.to_string())
    }
}

/// Short stable fingerprint of a prompt, for log correlation.
pub fn prompt_hash(prompt: &str) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    h.update(prompt.as_bytes());
    let mut out = hex::encode(h.finalize());
    out.truncate(12);
    out
}

fn build_request(
    cfg: &ProviderConfig,
    prompt: &str,
) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::Gemini => {
            let base = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".into());

            let url = format!(
                "{}/models/{}:generateContent",
                base.trim_end_matches('/'),
                cfg.model
            );

            let body = serde_json::json!({
                "contents": [
                    { "parts": [ { "text": prompt } ] }
                ]
            });

            (url, Vec::new(), body)
        }

        Provider::OpenAI => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/responses".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "input": prompt,
            });

            (
                url,
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Anthropic => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "max_tokens": 4096,
                "messages": [
                    { "role": "user", "content": prompt }
                ]
            });

            (
                url,
                vec![
                    ("x-api-key", cfg.api_key.clone()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }
    }
}
