//! Risk assessment for candidate SQL.
//!
//! A pure heuristic: statements that are unbounded or unfiltered are likely to
//! be expensive or overly broad and must be approved by a human before running.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

impl RiskAssessment {
    pub fn is_risky(&self) -> bool {
        !self.reasons.is_empty()
    }
}

static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blimit\b").expect("valid regex"));
static WHERE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwhere\b").expect("valid regex"));
static GROUP_BY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bgroup\s+by\b").expect("valid regex"));
static SELECT_STAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bselect\s+\*\s+from\b").expect("valid regex"));

/// Classify `sql` as risky (needs approval) or safe.
pub fn assess_sql(sql: &str) -> RiskAssessment {
    if sql.trim().is_empty() {
        return RiskAssessment {
            level: RiskLevel::Critical,
            reasons: vec!["empty_sql".to_string()],
        };
    }

    let mut reasons = Vec::new();
    if !LIMIT_RE.is_match(sql) {
        reasons.push("missing_limit".to_string());
    }
    if !WHERE_RE.is_match(sql) && !GROUP_BY_RE.is_match(sql) {
        reasons.push("missing_filter_or_grouping".to_string());
    }
    if SELECT_STAR_RE.is_match(sql) {
        reasons.push("select_star".to_string());
    }

    let level = if reasons.is_empty() {
        RiskLevel::Low
    } else {
        RiskLevel::High
    };
    RiskAssessment { level, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_select_star_is_risky() {
        let risk = assess_sql("SELECT * FROM sales_transactions");
        assert!(risk.is_risky());
        assert_eq!(risk.level, RiskLevel::High);
        assert_eq!(
            risk.reasons,
            vec!["missing_limit", "missing_filter_or_grouping", "select_star"]
        );
    }

    #[test]
    fn test_filtered_bounded_query_is_safe() {
        let risk = assess_sql("SELECT SUM(amount) FROM sales_transactions WHERE region = 'north' LIMIT 10");
        assert!(!risk.is_risky());
        assert_eq!(risk.level, RiskLevel::Low);
    }

    #[test]
    fn test_grouping_counts_as_filtering() {
        let risk = assess_sql("SELECT region, SUM(amount) FROM sales GROUP BY region LIMIT 50");
        assert!(!risk.is_risky());
    }

    #[test]
    fn test_empty_sql_is_critical() {
        let risk = assess_sql("   ");
        assert_eq!(risk.level, RiskLevel::Critical);
        assert!(risk.is_risky());
    }

    #[test]
    fn test_limit_word_must_be_whole() {
        let risk = assess_sql("SELECT limited FROM t WHERE x = 1");
        assert_eq!(risk.reasons, vec!["missing_limit"]);
    }
}
