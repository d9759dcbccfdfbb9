//! Deterministic clean-up applied to every candidate before the guard sees it.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sql_guard::insert_predicate;

static DATE_INTERVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)DATE\('(\d{4}-\d{2}-\d{2})'\s*-\s*INTERVAL\s*'(\d+\s+days?)'\)")
        .expect("valid regex")
});
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blimit\b").expect("valid regex"));

/// Rewrite `DATE('2024-01-31' - INTERVAL '7 days')`, which Postgres rejects,
/// into `(DATE '2024-01-31' - INTERVAL '7 days')`.
pub fn fix_date_literal_intervals(sql: &str) -> String {
    DATE_INTERVAL_RE
        .replace_all(sql, "(DATE '$1' - INTERVAL '$2')")
        .into_owned()
}

/// Restrict a query that never mentions `time_column` to the last `max_days` days.
pub fn clamp_date_range(sql: &str, time_column: Option<&str>, max_days: Option<u32>) -> String {
    let (column, days) = match (time_column, max_days) {
        (Some(c), Some(d)) if !c.is_empty() && d > 0 => (c, d),
        _ => return sql.to_string(),
    };
    if sql.to_lowercase().contains(&column.to_lowercase()) {
        return sql.to_string();
    }
    let clause = format!("{} >= CURRENT_DATE - INTERVAL '{} days'", column, days);
    insert_predicate(sql, &clause)
}

/// Strip trailing semicolons and append `LIMIT default_limit` when there is no LIMIT.
pub fn normalize_sql(sql: &str, default_limit: u32) -> String {
    let cleaned = sql.trim().trim_end_matches(';').trim_end();
    if LIMIT_RE.is_match(cleaned) {
        cleaned.to_string()
    } else {
        format!("{} LIMIT {}", cleaned, default_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_date_literal_intervals() {
        assert_eq!(
            fix_date_literal_intervals(
                "SELECT 1 FROM t WHERE d >= date('2024-01-31' - INTERVAL '7 days')"
            ),
            "SELECT 1 FROM t WHERE d >= (DATE '2024-01-31' - INTERVAL '7 days')"
        );
    }

    #[test]
    fn test_clamp_adds_window_when_time_column_missing() {
        assert_eq!(
            clamp_date_range("SELECT SUM(amount) FROM sales LIMIT 10", Some("sale_date"), Some(90)),
            "SELECT SUM(amount) FROM sales WHERE sale_date >= CURRENT_DATE - INTERVAL '90 days' LIMIT 10"
        );
        let with_time = "SELECT SUM(amount) FROM sales WHERE SALE_DATE > '2024-01-01'";
        assert_eq!(clamp_date_range(with_time, Some("sale_date"), Some(90)), with_time);
        assert_eq!(clamp_date_range("SELECT 1 FROM sales", Some("sale_date"), None), "SELECT 1 FROM sales");
    }

    #[test]
    fn test_normalize_sql() {
        assert_eq!(normalize_sql("SELECT a FROM t;  ", 200), "SELECT a FROM t LIMIT 200");
        assert_eq!(normalize_sql("SELECT a FROM t LIMIT 5;", 200), "SELECT a FROM t LIMIT 5");
    }
}
