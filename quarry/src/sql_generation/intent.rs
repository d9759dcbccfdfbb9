use serde::{Deserialize, Serialize};

const OFF_TOPIC_MARKERS: &[&str] = &["joke", "who are you", "lyrics", "story", "explain plugin", "weather"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionIntent {
    AnalyticsQuery,
    NeedsClarification,
    Unsupported,
}

impl QuestionIntent {
    /// Failure reason reported when this intent short-circuits generation.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            QuestionIntent::AnalyticsQuery => None,
            QuestionIntent::NeedsClarification => Some("clarification_required"),
            QuestionIntent::Unsupported => Some("unsupported_intent"),
        }
    }
}

/// Cheap classifier run before any model call.
pub fn classify_intent(question: &str) -> QuestionIntent {
    let lower = question.to_lowercase();
    if lower.trim().is_empty() {
        return QuestionIntent::NeedsClarification;
    }
    if OFF_TOPIC_MARKERS.iter().any(|m| lower.contains(m)) {
        return QuestionIntent::Unsupported;
    }
    if lower.split_whitespace().count() < 3 {
        return QuestionIntent::NeedsClarification;
    }
    QuestionIntent::AnalyticsQuery
}
