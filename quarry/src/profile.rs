//! Per-user answer preferences learned from goal text.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const KPI_TOKENS: &[&str] = &["revenue", "sales", "margin", "profit", "aov", "conversion", "returns"];
const MAX_KPIS: usize = 25;

static KPI_RES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    KPI_TOKENS
        .iter()
        .map(|token| {
            (
                *token,
                Regex::new(&format!(r"\b{}\b", token)).expect("valid regex"),
            )
        })
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    #[default]
    Concise,
    Detailed,
}

impl ResponseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStyle::Concise => "concise",
            ResponseStyle::Detailed => "detailed",
        }
    }
}

/// Style requested explicitly in `text`, if any.
pub fn detect_response_style(text: &str) -> Option<ResponseStyle> {
    let lower = text.to_lowercase();
    if ["short answer", "brief", "concise"].iter().any(|k| lower.contains(k)) {
        return Some(ResponseStyle::Concise);
    }
    if ["detailed", "deep dive", "explain fully", "full details"]
        .iter()
        .any(|k| lower.contains(k))
    {
        return Some(ResponseStyle::Detailed);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub tenant_id: String,
    pub response_style: ResponseStyle,
    /// Sorted, at most 25 entries.
    pub preferred_kpis: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            response_style: ResponseStyle::default(),
            preferred_kpis: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Fold the style and KPI mentions of `text` into this profile.
    pub fn learn_from_text(&mut self, text: &str) {
        if let Some(style) = detect_response_style(text) {
            self.response_style = style;
        }
        let lower = text.to_lowercase();
        let mut kpis: BTreeSet<String> = self.preferred_kpis.drain(..).collect();
        for (token, re) in KPI_RES.iter() {
            if re.is_match(&lower) {
                kpis.insert(token.to_string());
            }
        }
        self.preferred_kpis = kpis.into_iter().take(MAX_KPIS).collect();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_response_style() {
        assert_eq!(detect_response_style("Give me a BRIEF answer"), Some(ResponseStyle::Concise));
        assert_eq!(detect_response_style("deep dive on margin"), Some(ResponseStyle::Detailed));
        assert_eq!(detect_response_style("revenue by week"), None);
    }

    #[test]
    fn test_learn_from_text_accumulates_kpis() {
        let mut profile = UserProfile::new("u1", "retail");
        profile.learn_from_text("Detailed revenue and profit breakdown");
        profile.learn_from_text("sales trend, keep it concise");
        assert_eq!(profile.response_style, ResponseStyle::Concise);
        assert_eq!(profile.preferred_kpis, vec!["profit", "revenue", "sales"]);
    }

    #[test]
    fn test_kpi_tokens_match_whole_words() {
        let mut profile = UserProfile::new("u1", "retail");
        profile.learn_from_text("wholesales margins");
        assert!(profile.preferred_kpis.is_empty());
    }
}
