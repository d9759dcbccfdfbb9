use serde::{Deserialize, Serialize};

use super::intent::QuestionIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerShape {
    Number,
    Table,
    #[default]
    Text,
}

impl AnswerShape {
    /// Unknown labels become `Text`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "number" => AnswerShape::Number,
            "table" => AnswerShape::Table,
            _ => AnswerShape::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub hit: bool,
    /// First 8 hex characters of the cache key, set on hits.
    pub key_prefix: Option<String>,
}

/// Outcome of one `generate_sql` call.
///
/// `sql` is only ever set to a statement that passed the guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlGenerationResult {
    pub sql: Option<String>,
    pub answer_type: AnswerShape,
    pub assumptions: Vec<String>,
    pub confidence: Confidence,
    pub intent: QuestionIntent,
    /// Attempts beyond the first.
    pub repairs: u32,
    pub model_name: Option<String>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub cache_info: CacheInfo,
    pub chart_hint: String,
    pub summary: String,
}

impl SqlGenerationResult {
    /// A result without SQL, e.g. for an unsupported question.
    pub fn without_sql(intent: QuestionIntent, failure_reason: impl Into<String>) -> Self {
        Self {
            sql: None,
            answer_type: AnswerShape::Text,
            assumptions: Vec::new(),
            confidence: Confidence::Low,
            intent,
            repairs: 0,
            model_name: None,
            failure_reason: Some(failure_reason.into()),
            cache_info: CacheInfo::default(),
            chart_hint: "none".to_string(),
            summary: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.sql.is_some()
    }
}
