//! SQL Guard: keeps generated SQL read-only, allowlisted and dataset-scoped.
//!
//! `validate` runs five checks in a fixed order and stops at the first
//! failure. Write keywords are reported before the SELECT check so that a
//! `DROP` is always named as such. `enforce_dataset_filter` rewrites a
//! validated statement so that it is always filtered by the bound scoping
//! parameter.

mod keywords;
mod rewrite;

pub use keywords::{ALLOWED_FUNCTIONS, ALLOWED_KEYWORDS, BLOCKED_FUNCTIONS, FORBIDDEN_KEYWORDS};
pub(crate) use rewrite::insert_predicate;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

use crate::logging::truncate_sql;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Query must be a SELECT statement.")]
    NotSelect,

    #[error("Query contains forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("Query references identifiers not in allowlist: {}", .0.join(", "))]
    DisallowedIdentifiers(Vec<String>),

    #[error("Query contains suspicious pattern: {0}")]
    InjectionPattern(String),

    #[error("Query uses disallowed function {0}")]
    DisallowedFunction(String),

    #[error("Dataset filter must be parameterized, not literal: {0}")]
    LiteralScopeFilter(String),

    #[error("Dataset filter cannot be injected into a compound statement")]
    CompoundScope,
}

static SELECT_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\A\s*select\b").expect("valid regex"));
static LITERAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid regex"));
static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z_][a-z0-9_]*\b").expect("valid regex"));
static AS_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bas\s+([a-z_][a-z0-9_]*)").expect("valid regex"));
static PAREN_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\)\s+([a-z_][a-z0-9_]*)").expect("valid regex"));
static TABLE_ALIAS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:from|join)\s+([a-z_][a-z0-9_]*)\s+([a-z_][a-z0-9_]*)").expect("valid regex")
});
static ORDERING_CLAUSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:order\s+by|group\s+by|having)\b").expect("valid regex"));
static DERIVED_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:from|join)\s*\(").expect("valid regex"));

/// Patterns checked against the statement with string literals removed.
static STRUCTURAL_INJECTION: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("--", Regex::new(r"--").expect("valid regex")),
        ("/* */", Regex::new(r"(?s)/\*.*?\*/").expect("valid regex")),
        (";\\s*\\w+", Regex::new(r";\s*\w+").expect("valid regex")),
    ]
});

/// Patterns that only make sense with the literals in place.
static LITERAL_INJECTION: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("' OR '", Regex::new(r"(?i)'\s*OR\s*'").expect("valid regex")),
        ("'; DROP", Regex::new(r"(?i)'\s*;\s*DROP").expect("valid regex")),
    ]
});

static RESERVED: Lazy<HashSet<String>> = Lazy::new(keywords::reserved_words);

/// Validator bound to one tenant's allowlist.
#[derive(Debug, Clone)]
pub struct SqlGuard {
    allowed_tables: HashSet<String>,
    allowed_columns: HashSet<String>,
}

impl SqlGuard {
    pub fn new<T, C>(tables: T, columns: C) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        Self {
            allowed_tables: tables.into_iter().map(|t| t.as_ref().to_lowercase()).collect(),
            allowed_columns: columns.into_iter().map(|c| c.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn allowed_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.allowed_tables.iter().cloned().collect();
        tables.sort();
        tables
    }

    pub fn allowed_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.allowed_columns.iter().cloned().collect();
        columns.sort();
        columns
    }

    /// Run every check in order, failing on the first violation.
    pub fn validate(&self, sql: &str) -> Result<(), GuardError> {
        let sql = sql.trim();
        check_forbidden_keywords(sql)?;
        if !SELECT_START_RE.is_match(sql) {
            return Err(GuardError::NotSelect);
        }

        let stripped = strip_literals(sql);
        self.check_allowlist(&stripped)?;
        check_injection_patterns(sql, &stripped)?;
        check_blocked_functions(&stripped)?;

        tracing::debug!(sql = %truncate_sql(sql), "SQL validation passed");
        Ok(())
    }

    fn check_allowlist(&self, stripped: &str) -> Result<(), GuardError> {
        let lower = stripped.to_lowercase();
        let aliases = self.alias_definitions(&lower);
        let ordering: Vec<usize> = ORDERING_CLAUSE_RE.find_iter(&lower).map(|m| m.start()).collect();

        let disallowed: BTreeSet<String> = IDENT_RE
            .find_iter(&lower)
            .filter(|m| !RESERVED.contains(m.as_str()))
            .filter(|m| !self.allowed_tables.contains(m.as_str()) && !self.allowed_columns.contains(m.as_str()))
            .filter(|m| !is_alias_reference(&lower, m.start(), m.as_str(), &aliases, &ordering))
            .map(|m| m.as_str().to_string())
            .collect();

        if disallowed.is_empty() {
            Ok(())
        } else {
            let offending: Vec<String> = disallowed.into_iter().collect();
            tracing::warn!(identifiers = ?offending, "SQL references identifiers outside the allowlist");
            Err(GuardError::DisallowedIdentifiers(offending))
        }
    }

    /// Every `AS x`, `) x` and `FROM <allowed table> x` alias with its position.
    fn alias_definitions<'a>(&self, lower: &'a str) -> Vec<AliasDefinition<'a>> {
        let derived = derived_tables(lower);
        let mut found: Vec<regex::Match<'a>> = AS_ALIAS_RE
            .captures_iter(lower)
            .chain(PAREN_ALIAS_RE.captures_iter(lower))
            .filter_map(|caps| caps.get(1))
            .collect();
        for caps in TABLE_ALIAS_RE.captures_iter(lower) {
            if let (Some(table), Some(alias)) = (caps.get(1), caps.get(2)) {
                if self.allowed_tables.contains(table.as_str()) && !RESERVED.contains(alias.as_str()) {
                    found.push(alias);
                }
            }
        }
        found
            .into_iter()
            .map(|m| AliasDefinition {
                name: m.as_str(),
                start: m.start(),
                derived: derived
                    .iter()
                    .filter(|d| d.span.contains(m.start()))
                    .max_by_key(|d| d.span.open)
                    .copied(),
            })
            .collect()
    }

    /// Ensure `sql` is filtered by the bound parameter `param`.
    ///
    /// A quoted value compared to `param` is rejected. A statement that already
    /// mentions `param` is returned as is.
    pub fn enforce_dataset_filter(&self, sql: &str, param: &str) -> Result<String, GuardError> {
        enforce_dataset_filter(sql, param)
    }
}

/// Free-function form of [`SqlGuard::enforce_dataset_filter`]; the rewrite does
/// not depend on the allowlist.
pub fn enforce_dataset_filter(sql: &str, param: &str) -> Result<String, GuardError> {
    let escaped = regex::escape(param);
    let literal = Regex::new(&format!(r#"(?i)\b{}\s*=\s*['"]"#, escaped))
        .map_err(|_| GuardError::LiteralScopeFilter(param.to_string()))?;
    if literal.is_match(sql) {
        tracing::warn!(param, "literal dataset filter rejected");
        return Err(GuardError::LiteralScopeFilter(param.to_string()));
    }

    let mention = Regex::new(&format!(r"(?i)\b{}\b", escaped))
        .map_err(|_| GuardError::LiteralScopeFilter(param.to_string()))?;
    if mention.is_match(sql) {
        return Ok(sql.to_string());
    }

    if rewrite::has_set_operation(sql) {
        return Err(GuardError::CompoundScope);
    }

    let predicate = match rewrite::first_from_target(sql) {
        Some(alias) => format!("{}.{} = :{}", alias, param, param),
        None => format!("{} = :{}", param, param),
    };
    let scoped = insert_predicate(sql, &predicate);
    tracing::debug!(sql = %truncate_sql(&scoped), "dataset filter injected");
    Ok(scoped)
}

#[derive(Debug, Clone, Copy)]
struct ParenSpan {
    open: usize,
    close: usize,
}

impl ParenSpan {
    fn contains(&self, at: usize) -> bool {
        self.open < at && at < self.close
    }
}

/// A `FROM (...)` subquery and the parentheses around the query that reads it.
#[derive(Debug, Clone, Copy)]
struct DerivedTable {
    span: ParenSpan,
    parent: Option<ParenSpan>,
}

#[derive(Debug)]
struct AliasDefinition<'a> {
    name: &'a str,
    start: usize,
    /// Innermost derived table holding the alias, if any.
    derived: Option<DerivedTable>,
}

/// An occurrence of an alias name is only exempt where it can mean the
/// alias: the definition itself, a `x.` qualifier, an ordering or grouping
/// clause after the definition, or in the query that reads the subquery
/// defining it. Any other occurrence is a plain reference and must be
/// allowlisted.
fn is_alias_reference(
    lower: &str,
    at: usize,
    name: &str,
    aliases: &[AliasDefinition<'_>],
    ordering: &[usize],
) -> bool {
    let qualifier = lower[at + name.len()..].trim_start().starts_with('.');
    aliases.iter().filter(|a| a.name == name).any(|a| {
        a.start == at
            || qualifier
            || (a.start < at && ordering.iter().any(|o| a.start < *o && *o < at))
            || a.derived.map_or(false, |d| {
                !d.span.contains(at) && d.parent.map_or(true, |p| p.contains(at))
            })
    })
}

/// Every parenthesised subquery that follows `FROM` or `JOIN`.
fn derived_tables(lower: &str) -> Vec<DerivedTable> {
    let opens: HashSet<usize> = DERIVED_OPEN_RE.find_iter(lower).map(|m| m.end() - 1).collect();
    let mut stack: Vec<(usize, Option<usize>)> = Vec::new();
    let mut closes: HashMap<usize, usize> = HashMap::new();
    let mut derived: Vec<(usize, Option<usize>)> = Vec::new();
    for (i, c) in lower.char_indices() {
        match c {
            '(' => {
                let parent = stack.last().map(|(open, _)| *open);
                stack.push((i, parent));
            }
            ')' => {
                if let Some((open, parent)) = stack.pop() {
                    closes.insert(open, i);
                    if opens.contains(&open) {
                        derived.push((open, parent));
                    }
                }
            }
            _ => {}
        }
    }
    let span = |open: usize| closes.get(&open).map(|close| ParenSpan { open, close: *close });
    derived
        .into_iter()
        .filter_map(|(open, parent)| {
            Some(DerivedTable {
                span: span(open)?,
                parent: parent.and_then(&span),
            })
        })
        .collect()
}

fn strip_literals(sql: &str) -> String {
    LITERAL_RE.replace_all(sql, "''").into_owned()
}

fn check_forbidden_keywords(sql: &str) -> Result<(), GuardError> {
    let upper = sql.to_uppercase();
    let words: HashSet<&str> = upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .collect();
    match FORBIDDEN_KEYWORDS.iter().find(|kw| words.contains(**kw)) {
        Some(kw) => {
            tracing::warn!(keyword = *kw, "forbidden keyword in SQL");
            Err(GuardError::ForbiddenKeyword(kw.to_string()))
        }
        None => Ok(()),
    }
}

fn check_injection_patterns(sql: &str, stripped: &str) -> Result<(), GuardError> {
    for (name, pattern) in STRUCTURAL_INJECTION.iter() {
        if pattern.is_match(stripped) {
            return Err(GuardError::InjectionPattern(name.to_string()));
        }
    }
    for (name, pattern) in LITERAL_INJECTION.iter() {
        if pattern.is_match(sql) {
            return Err(GuardError::InjectionPattern(name.to_string()));
        }
    }
    Ok(())
}

fn check_blocked_functions(stripped: &str) -> Result<(), GuardError> {
    let lower = stripped.to_lowercase();
    for function in BLOCKED_FUNCTIONS {
        let found = IDENT_RE.find_iter(&lower).any(|m| m.as_str() == *function);
        if found {
            return Err(GuardError::DisallowedFunction(function.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn guard() -> SqlGuard {
        SqlGuard::new(
            ["sales_transactions", "customers"],
            ["amount", "region", "sale_date", "customer_id", "updated_at", "dataset_id", "name"],
        )
    }

    #[test]
    fn test_drop_is_forbidden() {
        let err = guard().validate("DROP TABLE sales_transactions").unwrap_err();
        assert_eq!(err, GuardError::ForbiddenKeyword("DROP".to_string()));
        assert_eq!(
            guard().validate("WITH x AS (SELECT 1) SELECT 1").unwrap_err(),
            GuardError::NotSelect
        );

        let err = guard()
            .validate("SELECT amount FROM sales_transactions; drop table customers")
            .unwrap_err();
        assert_eq!(err, GuardError::ForbiddenKeyword("DROP".to_string()));
    }

    #[test]
    fn test_forbidden_keyword_any_case() {
        for sql in [
            "SELECT amount FROM sales_transactions WHERE region IN (SELECT 1) UNION SELECT * FROM x DeLeTe",
            "select amount from sales_transactions where\tUPDATE\n",
        ] {
            assert!(matches!(
                guard().validate(sql),
                Err(GuardError::ForbiddenKeyword(_))
            ));
        }
    }

    #[test]
    fn test_keyword_inside_identifier_is_allowed() {
        guard()
            .validate("SELECT updated_at FROM sales_transactions WHERE region = 'north' LIMIT 5")
            .unwrap();
    }

    #[test]
    fn test_unknown_identifiers_are_listed_sorted() {
        let err = guard()
            .validate("SELECT password, email FROM users LIMIT 5")
            .unwrap_err();
        assert_eq!(
            err,
            GuardError::DisallowedIdentifiers(vec![
                "email".to_string(),
                "password".to_string(),
                "users".to_string()
            ])
        );
        assert_eq!(
            err.to_string(),
            "Query references identifiers not in allowlist: email, password, users"
        );
    }

    #[test]
    fn test_aliases_and_functions_are_ignored() {
        guard()
            .validate(
                "SELECT s.region, SUM(s.amount) AS total, COUNT(*) cnt \
                 FROM sales_transactions s JOIN customers AS c ON c.customer_id = s.customer_id \
                 WHERE EXTRACT(year FROM s.sale_date) = 2024 \
                 GROUP BY s.region ORDER BY total DESC LIMIT 10",
            )
            .unwrap();
    }

    #[test]
    fn test_aliasing_a_forbidden_column_does_not_hide_it() {
        let err = guard()
            .validate("SELECT secret AS secret FROM sales_transactions LIMIT 1")
            .unwrap_err();
        assert_eq!(err, GuardError::DisallowedIdentifiers(vec!["secret".to_string()]));
    }

    #[test]
    fn test_alias_name_reused_as_a_reference_is_still_checked() {
        let cases = [
            ("SELECT secret, amount AS secret FROM sales_transactions LIMIT 1", "secret"),
            ("SELECT ssn FROM customers ssn LIMIT 5", "ssn"),
            ("SELECT ssn FROM customers AS ssn LIMIT 5", "ssn"),
            ("SELECT COUNT(*) ssn, ssn FROM sales_transactions LIMIT 5", "ssn"),
        ];
        for (sql, name) in cases {
            assert_eq!(
                guard().validate(sql).unwrap_err(),
                GuardError::DisallowedIdentifiers(vec![name.to_string()]),
                "{sql}"
            );
        }
    }

    #[test]
    fn test_alias_used_where_it_can_resolve() {
        for sql in [
            "SELECT region, SUM(amount) AS revenue FROM sales_transactions GROUP BY region ORDER BY revenue DESC LIMIT 5",
            "SELECT t.total FROM (SELECT SUM(amount) AS total FROM sales_transactions) t LIMIT 1",
            "SELECT total FROM (SELECT SUM(amount) total FROM sales_transactions) AS t LIMIT 1",
        ] {
            guard().validate(sql).unwrap();
        }
        for sql in [
            "SELECT secret, (SELECT amount AS secret FROM customers) FROM sales_transactions LIMIT 1",
            "SELECT secret FROM customers WHERE amount IN \
             (SELECT t.amount FROM (SELECT amount, amount AS secret FROM sales_transactions) t) LIMIT 1",
        ] {
            assert_eq!(
                guard().validate(sql).unwrap_err(),
                GuardError::DisallowedIdentifiers(vec!["secret".to_string()]),
                "{sql}"
            );
        }
    }

    #[test]
    fn test_literals_are_not_identifiers() {
        guard()
            .validate("SELECT amount FROM sales_transactions WHERE name = 'north east' LIMIT 5")
            .unwrap();
    }

    #[test]
    fn test_injection_patterns() {
        let cases = [
            "SELECT amount FROM sales_transactions --",
            "SELECT amount /* amount */ FROM sales_transactions",
            "SELECT amount FROM sales_transactions WHERE name = '' OR '1'='1'",
        ];
        for sql in cases {
            assert!(
                matches!(guard().validate(sql), Err(GuardError::InjectionPattern(_))),
                "{sql}"
            );
        }
    }

    #[test]
    fn test_blocked_function_when_otherwise_allowed() {
        let guard = SqlGuard::new(["sales_transactions"], ["amount", "pg_sleep"]);
        let err = guard
            .validate("SELECT pg_sleep(10) FROM sales_transactions LIMIT 1")
            .unwrap_err();
        assert_eq!(err, GuardError::DisallowedFunction("pg_sleep".to_string()));
    }

    #[test]
    fn test_literal_scope_value_rejected() {
        let err = enforce_dataset_filter(
            "SELECT amount FROM sales_transactions WHERE dataset_id = 'abc'",
            "dataset_id",
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::LiteralScopeFilter(_)));
    }

    #[test]
    fn test_filter_injected_before_limit_once() {
        let scoped = enforce_dataset_filter(
            "SELECT SUM(amount) FROM sales_transactions t WHERE region = 'north' LIMIT 200",
            "dataset_id",
        )
        .unwrap();
        assert_eq!(
            scoped,
            "SELECT SUM(amount) FROM sales_transactions t WHERE (region = 'north') AND t.dataset_id = :dataset_id LIMIT 200"
        );
        assert_eq!(scoped.matches("= :dataset_id").count(), 1);
        assert!(scoped.find("dataset_id").unwrap() < scoped.find("LIMIT").unwrap());
    }

    #[test]
    fn test_filter_without_where_uses_table_name() {
        let scoped = enforce_dataset_filter(
            "SELECT region, SUM(amount) FROM sales_transactions GROUP BY region LIMIT 50",
            "dataset_id",
        )
        .unwrap();
        assert_eq!(
            scoped,
            "SELECT region, SUM(amount) FROM sales_transactions WHERE sales_transactions.dataset_id = :dataset_id GROUP BY region LIMIT 50"
        );
    }

    #[test]
    fn test_already_scoped_statement_unchanged() {
        let sql = "SELECT amount FROM sales_transactions WHERE dataset_id = :dataset_id LIMIT 5";
        assert_eq!(enforce_dataset_filter(sql, "dataset_id").unwrap(), sql);
    }

    #[test]
    fn test_compound_statement_cannot_be_scoped() {
        let err = enforce_dataset_filter(
            "SELECT amount FROM sales_transactions UNION SELECT amount FROM customers",
            "dataset_id",
        )
        .unwrap_err();
        assert_eq!(err, GuardError::CompoundScope);
    }
}
