//! Text-generation backend seam.
//!
//! Planning, SQL generation, verification and narrative summaries all go
//! through [`TextGenerator`]. Every caller has a non-LLM fallback, so an
//! unavailable backend is an ordinary `Err(LlmError::Unavailable)`.

mod scripted;

pub use scripted::ScriptedTextGenerator;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("Text-generation backend unavailable")]
    Unavailable,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Could not parse backend response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.0,
            max_tokens: 500,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier recorded on results and mixed into cache keys.
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("valid regex"));

/// Pull a JSON object out of a model response.
///
/// Tries the whole text, then a fenced code block, then the span from the
/// first `{` to the last `}`.
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(value);
    }
    if let Some(block) = FENCED_RE.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str(block.as_str()) {
            return Some(value);
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end]).ok(),
        _ => None,
    }
}

/// [`extract_json`] followed by deserialization into `T`.
pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> Result<T, LlmError> {
    let value = extract_json(response).ok_or_else(|| {
        LlmError::InvalidResponse(crate::logging::truncate_chars(response, 400))
    })?;
    serde_json::from_value(value).map_err(|e| LlmError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_plain_json() {
        assert_eq!(extract_json(r#"{"sql": "SELECT 1"}"#), Some(json!({"sql": "SELECT 1"})));
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here you go:\n```json\n{\"approved\": true}\n```\nthanks";
        assert_eq!(extract_json(text), Some(json!({"approved": true})));
    }

    #[test]
    fn test_extract_embedded_object() {
        let text = "The answer is {\"a\": {\"b\": 1}} as requested.";
        assert_eq!(extract_json(text), Some(json!({"a": {"b": 1}})));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_json_response_reports_garbage() {
        #[derive(Debug, Deserialize)]
        struct Reply {
            #[allow(dead_code)]
            sql: String,
        }
        assert!(matches!(
            parse_json_response::<Reply>("nope"),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(parse_json_response::<Reply>(r#"{"sql": "SELECT 1"}"#).is_ok());
    }
}
