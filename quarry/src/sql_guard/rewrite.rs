//! Clause-aware predicate insertion.
//!
//! Only top-level clauses count: anything inside parentheses or string
//! literals is ignored, so subqueries and `EXTRACT(day FROM ts)` never move the
//! insertion point.

use once_cell::sync::Lazy;
use regex::Regex;

use super::keywords::FROM_TERMINATORS;

static CLAUSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(from|where|group\s+by|having|order\s+by|limit|offset|fetch|union|intersect|except)\b")
        .expect("valid regex")
});

static FROM_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfrom\s+([a-z_][a-z0-9_]*)(?:\s+([a-z_][a-z0-9_]*))?(?:\s+([a-z_][a-z0-9_]*))?")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    From,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
    Fetch,
    SetOperation,
}

#[derive(Debug, Clone, Copy)]
struct ClauseMatch {
    clause: Clause,
    start: usize,
    end: usize,
}

/// Paren depth and literal state at byte offset `pos`.
fn scan_state(sql: &str, pos: usize) -> (i32, bool) {
    let mut depth = 0;
    let mut in_literal = false;
    for ch in sql[..pos].chars() {
        match ch {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => depth -= 1,
            _ => {}
        }
    }
    (depth, in_literal)
}

fn is_top_level(sql: &str, pos: usize) -> bool {
    matches!(scan_state(sql, pos), (0, false))
}

fn top_level_clauses(sql: &str) -> Vec<ClauseMatch> {
    CLAUSE_RE
        .captures_iter(sql)
        .filter_map(|caps| {
            let m = caps.get(1)?;
            if !is_top_level(sql, m.start()) {
                return None;
            }
            let word = m.as_str().to_lowercase();
            let clause = if word == "from" {
                Clause::From
            } else if word == "where" {
                Clause::Where
            } else if word.starts_with("group") {
                Clause::GroupBy
            } else if word == "having" {
                Clause::Having
            } else if word.starts_with("order") {
                Clause::OrderBy
            } else if word == "limit" {
                Clause::Limit
            } else if word == "offset" {
                Clause::Offset
            } else if word == "fetch" {
                Clause::Fetch
            } else {
                Clause::SetOperation
            };
            Some(ClauseMatch {
                clause,
                start: m.start(),
                end: m.end(),
            })
        })
        .collect()
}

/// Whether the statement combines several SELECTs at top level.
pub(crate) fn has_set_operation(sql: &str) -> bool {
    top_level_clauses(sql)
        .iter()
        .any(|c| c.clause == Clause::SetOperation)
}

/// Table name or alias of the first top-level FROM target.
pub(crate) fn first_from_target(sql: &str) -> Option<String> {
    let caps = FROM_TARGET_RE
        .captures_iter(sql)
        .find(|caps| caps.get(0).map(|m| is_top_level(sql, m.start())).unwrap_or(false))?;
    let table = caps.get(1)?.as_str().to_string();
    let next = caps.get(2).map(|m| m.as_str().to_lowercase());
    let alias = match next.as_deref() {
        Some("as") => caps.get(3).map(|m| m.as_str().to_string()),
        Some(word) if !FROM_TERMINATORS.contains(&word) => caps.get(2).map(|m| m.as_str().to_string()),
        _ => None,
    };
    Some(alias.unwrap_or(table))
}

/// Add `predicate` to the top-level filter of `sql`.
///
/// The predicate goes right before the first trailing clause (`GROUP BY`,
/// `HAVING`, `ORDER BY`, `LIMIT`, `OFFSET`, `FETCH`), or at the end. An existing `WHERE` body is
/// wrapped in parentheses so that an `OR` in it cannot bypass the predicate.
pub(crate) fn insert_predicate(sql: &str, predicate: &str) -> String {
    let sql = sql.trim();
    let clauses = top_level_clauses(sql);
    let from_pos = clauses
        .iter()
        .find(|c| c.clause == Clause::From)
        .map(|c| c.end)
        .unwrap_or(0);

    let insert_at = clauses
        .iter()
        .filter(|c| c.start >= from_pos)
        .find(|c| {
            matches!(
                c.clause,
                Clause::GroupBy
                    | Clause::Having
                    | Clause::OrderBy
                    | Clause::Limit
                    | Clause::Offset
                    | Clause::Fetch
            )
        })
        .map(|c| c.start)
        .unwrap_or(sql.len());

    let where_end = clauses
        .iter()
        .filter(|c| c.start >= from_pos && c.start < insert_at)
        .find(|c| c.clause == Clause::Where)
        .map(|c| c.end);

    let scoped = match where_end {
        Some(body_start) => format!(
            "{} ({}) AND {}",
            &sql[..body_start],
            sql[body_start..insert_at].trim(),
            predicate
        ),
        None => format!("{} WHERE {}", sql[..insert_at].trim_end(), predicate),
    };

    let tail = sql[insert_at..].trim();
    if tail.is_empty() {
        scoped
    } else {
        format!("{} {}", scoped, tail)
    }
}
