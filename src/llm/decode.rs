//! llm/decode.rs
//!
//! Tiered decoding of generation-service payloads.
//!
//! 1. strict: typed decode of the provider's documented response shape
//! 2. normalized: repair common payload damage, then probe known text paths
//! 3. give up: `MalformedResponse`

use serde::Deserialize;
use serde_json::Value;

use crate::llm::client::{GenerationFailure, Provider};

/* ============================================================
   Strict shapes
   ============================================================ */

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    output: Vec<OpenAiItem>,
}

#[derive(Deserialize)]
struct OpenAiItem {
    #[serde(default)]
    content: Vec<TextPart>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    #[serde(default)]
    text: Option<String>,
}

/* ============================================================
   Public entry
   ============================================================ */

pub fn decode_text(provider: Provider, raw: &str) -> Result<String, GenerationFailure> {
    if let Some(text) = decode_strict(provider, raw) {
        return non_empty(text);
    }

    let normalized = normalize(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&normalized) {
        if let Some(text) = probe(provider, &v) {
            return non_empty(text);
        }
    }

    Err(GenerationFailure::MalformedResponse(format!(
        "no text found in {} response: {}",
        provider,
        preview(raw)
    )))
}

fn non_empty(text: String) -> Result<String, GenerationFailure> {
    if text.trim().is_empty() {
        Err(GenerationFailure::MalformedResponse(
            "response text is empty".into(),
        ))
    } else {
        Ok(text)
    }
}

/* ============================================================
   Tier 1: strict
   ============================================================ */

fn decode_strict(provider: Provider, raw: &str) -> Option<String> {
    match provider {
        Provider::Gemini => {
            let r: GeminiResponse = serde_json::from_str(raw).ok()?;
            r.candidates.into_iter().next()?.content.parts.into_iter().next()?.text
        }
        Provider::OpenAI => {
            let r: OpenAiResponse = serde_json::from_str(raw).ok()?;
            r.output
                .into_iter()
                .flat_map(|item| item.content)
                .find_map(|c| c.text)
        }
        Provider::Anthropic => {
            let r: AnthropicResponse = serde_json::from_str(raw).ok()?;
            r.content.into_iter().next()?.text
        }
    }
}

/* ============================================================
   Tier 2: normalize + probe
   ============================================================ */

fn probe(provider: Provider, v: &Value) -> Option<String> {
    let pointers: &[&str] = match provider {
        Provider::Gemini => &[
            "/candidates/0/content/parts/0/text",
            "/contents/0/parts/0/text",
        ],
        Provider::OpenAI => &["/choices/0/message/content", "/output_text"],
        Provider::Anthropic => &["/content/0/text", "/completion"],
    };

    for p in pointers {
        if let Some(text) = v.pointer(p).and_then(Value::as_str) {
            return Some(text.to_owned());
        }
    }

    if provider == Provider::OpenAI {
        return v
            .get("output")
            .and_then(Value::as_array)
            .and_then(|arr| {
                arr.iter().find_map(|item| {
                    item.get("content")?
                        .as_array()?
                        .iter()
                        .find_map(|c| c.get("text")?.as_str())
                })
            })
            .map(str::to_owned);
    }

    None
}

/// Strip wrapping code fences, normalize typographic quotes and
/// drop backslashes that do not start a valid JSON escape.
pub(crate) fn normalize(raw: &str) -> String {
    let mut s = raw.trim();

    if let Some(rest) = s.strip_prefix("```") {
        s = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest,
        };
        s = s.trim_end();
        s = s.strip_suffix("```").unwrap_or(s);
    }

    let s = s
        .replace(['\u{201C}', '\u{201D}', '\u{201E}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => {}
        }
    }

    out
}

fn preview(raw: &str) -> String {
    let line: String = raw.chars().take(160).collect();
    if raw.chars().count() > 160 {
        format!("{}...", line.replace('\n', " "))
    } else {
        line.replace('\n', " ")
    }
}
