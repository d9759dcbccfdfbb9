//! Word lists used by the guard.

/// Write or administrative statements; rejected anywhere as a whole word.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "TRUNCATE", "ALTER", "GRANT", "REVOKE",
    "PRAGMA", "VACUUM", "ANALYZE", "REINDEX", "ATTACH", "DETACH", "COPY", "MERGE",
];

/// Read-only SQL keywords that never count as identifiers.
pub const ALLOWED_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "ORDER", "LIMIT", "OFFSET", "JOIN", "INNER",
    "LEFT", "RIGHT", "FULL", "OUTER", "ON", "USING", "UNION", "INTERSECT", "EXCEPT", "CASE",
    "WHEN", "THEN", "ELSE", "END", "AND", "OR", "NOT", "IN", "EXISTS", "BETWEEN", "LIKE",
    "ILIKE", "IS", "NULL", "DISTINCT", "AS", "WITH", "RECURSIVE", "HAVING", "CROSS", "ASC",
    "DESC", "NULLS", "FIRST", "LAST", "OVER", "PARTITION", "FILTER", "WITHIN", "ROWS",
    "RANGE", "PRECEDING", "FOLLOWING", "UNBOUNDED", "CURRENT", "ROW", "TRUE", "FALSE",
    "ALL", "ANY", "INTERVAL", "FETCH", "NEXT", "ONLY",
];

/// Aggregate, date, string and math functions (plus cast target types).
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    "SUM", "COUNT", "AVG", "MIN", "MAX", "STDDEV", "VARIANCE", "MEDIAN", "DATE", "EXTRACT",
    "CURRENT_DATE", "CURRENT_TIMESTAMP", "NOW", "DATE_TRUNC", "DATE_PART", "STRFTIME",
    "JULIANDAY", "TO_CHAR", "TO_DATE", "UPPER", "LOWER", "CONCAT", "SUBSTRING", "SUBSTR",
    "LENGTH", "TRIM", "REPLACE", "ROUND", "ABS", "CEIL", "FLOOR", "COALESCE", "NULLIF",
    "IFNULL", "GREATEST", "LEAST", "CAST", "ROW_NUMBER", "RANK", "DENSE_RANK", "LAG", "LEAD",
    "STRING_AGG", "NUMERIC", "INTEGER", "DECIMAL", "REAL", "TEXT", "TIMESTAMP",
];

/// Date-part and interval units used inside EXTRACT/DATE_TRUNC/INTERVAL expressions.
pub const DATE_PARTS: &[&str] = &[
    "YEAR", "YEARS", "QUARTER", "MONTH", "MONTHS", "WEEK", "WEEKS", "DAY", "DAYS", "DOW",
    "DOY", "HOUR", "HOURS", "MINUTE", "MINUTES", "SECOND", "SECONDS", "EPOCH",
];

/// Administrative functions that are never allowed.
pub const BLOCKED_FUNCTIONS: &[&str] = &["pg_sleep", "pg_stat_activity", "pg_catalog", "set_config"];

/// Keywords that can follow a FROM target and must not be mistaken for an alias.
pub(crate) const FROM_TERMINATORS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "outer", "cross", "on", "using",
    "group", "order", "having", "limit", "offset", "fetch", "union", "intersect", "except", "window",
];

/// Lower-cased set of every word that is never an identifier.
pub(crate) fn reserved_words() -> std::collections::HashSet<String> {
    FORBIDDEN_KEYWORDS
        .iter()
        .chain(ALLOWED_KEYWORDS)
        .chain(ALLOWED_FUNCTIONS)
        .chain(DATE_PARTS)
        .map(|w| w.to_lowercase())
        .collect()
}
