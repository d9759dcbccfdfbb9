use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::RwLock;

use super::{LearnedExample, RetrievalError, RetrievalKind, RetrievalRequest, RetrievedItem, Retriever};
use crate::cache::stable_hash;
use crate::tenant::TenantContext;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "to", "of", "in", "on", "for", "is", "are", "was", "were", "be", "as", "at",
    "from", "by", "with", "and", "or", "that", "this", "it", "show", "me", "what", "how", "when",
    "which", "who", "whom", "about", "into", "than", "then", "also", "now",
];

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z][a-z0-9_]+").expect("valid regex"));

/// Lowercased tokens longer than two characters, minus stop words.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.len() > 2 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Share of query tokens present in the item, plus 0.03 per query token that
/// appears verbatim in the raw text (first 8 tokens only).
pub(crate) fn similarity(query: &[String], text: &str) -> f64 {
    let q: Vec<&str> = {
        let mut seen = HashSet::new();
        query.iter().map(String::as_str).filter(|t| seen.insert(*t)).collect()
    };
    if q.is_empty() {
        return 0.0;
    }
    let doc: HashSet<String> = tokenize(text).into_iter().collect();
    if doc.is_empty() {
        return 0.0;
    }
    let overlap = q.iter().filter(|t| doc.contains(**t)).count();
    let raw = text.to_lowercase();
    let phrase_hits = q.iter().take(8).filter(|t| raw.contains(**t)).count();
    overlap as f64 / q.len() as f64 + phrase_hits as f64 * 0.03
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone)]
struct Document {
    id: String,
    tenant_id: String,
    dataset_id: Option<String>,
    kind: RetrievalKind,
    title: String,
    body: String,
}

#[derive(Debug, Clone)]
struct StoredExample {
    example: LearnedExample,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Index {
    documents: Vec<Document>,
    examples: Vec<StoredExample>,
}

/// Token-overlap retriever over documents and examples held in memory.
#[derive(Default)]
pub struct InMemoryRetriever {
    index: RwLock<Index>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one schema item per column of `tenant`.
    pub fn index_tenant_schema(&self, tenant: &TenantContext) -> Result<usize, RetrievalError> {
        let mut docs = Vec::new();
        for (table_name, table) in &tenant.config().tables {
            for (col_name, col) in &table.columns {
                docs.push(Document {
                    id: format!("{}.{}", table_name, col_name),
                    tenant_id: tenant.tenant_id().to_string(),
                    dataset_id: None,
                    kind: RetrievalKind::Schema,
                    title: format!("{}.{}", table_name, col_name),
                    body: format!("{}.{} ({}) - {}", table_name, col_name, col.column_type, col.meaning)
                        .trim()
                        .to_string(),
                });
            }
        }
        let count = docs.len();
        self.index
            .write()
            .map_err(|_| RetrievalError::LockPoisoned)?
            .documents
            .extend(docs);
        Ok(count)
    }

    /// Add a knowledge-base document. `dataset_id = None` makes it visible to every dataset.
    pub fn add_document(
        &self,
        tenant_id: &str,
        dataset_id: Option<&str>,
        title: &str,
        content: &str,
    ) -> Result<(), RetrievalError> {
        let mut index = self.index.write().map_err(|_| RetrievalError::LockPoisoned)?;
        let id = format!("kb:{}", index.documents.len() + 1);
        index.documents.push(Document {
            id,
            tenant_id: tenant_id.to_string(),
            dataset_id: dataset_id.map(str::to_string),
            kind: RetrievalKind::KnowledgeBase,
            title: title.to_string(),
            body: content.to_string(),
        });
        Ok(())
    }

    pub fn examples(&self) -> Vec<LearnedExample> {
        self.index
            .read()
            .map(|i| i.examples.iter().map(|s| s.example.clone()).collect())
            .unwrap_or_default()
    }

    fn visible(tenant_id: &str, dataset_id: Option<&str>, req: &RetrievalRequest) -> bool {
        tenant_id == req.tenant_id
            && match (dataset_id, req.dataset_id.as_deref()) {
                (None, _) | (_, None) => true,
                (Some(a), Some(b)) => a == b,
            }
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedItem>, RetrievalError> {
        let index = self.index.read().map_err(|_| RetrievalError::LockPoisoned)?;
        let query = tokenize(&request.question);

        let mut scored: Vec<RetrievedItem> = match request.kind {
            RetrievalKind::Example => {
                let mut examples: Vec<&StoredExample> = index
                    .examples
                    .iter()
                    .filter(|s| Self::visible(&s.example.tenant_id, s.example.dataset_id.as_deref(), request))
                    .collect();
                examples.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                examples
                    .into_iter()
                    .filter_map(|stored| {
                        let ex = &stored.example;
                        let blob = format!(
                            "{} {} {}",
                            ex.question,
                            ex.rewritten_question.as_deref().unwrap_or(""),
                            ex.answer_summary.as_deref().unwrap_or("")
                        );
                        let score = similarity(&query, &blob) + ex.quality_score * 0.2;
                        (score > 0.0).then(|| {
                            let key = stable_hash(&(&ex.question, &ex.sql));
                            let snippet = format!(
                                "Q: {}\nSQL: {}\nA: {}",
                                ex.question,
                                ex.sql,
                                ex.answer_summary.as_deref().unwrap_or("")
                            );
                            RetrievedItem {
                                id: format!("example:{}", &key[..12]),
                                title: ex.question.chars().take(120).collect(),
                                snippet: snippet.chars().take(900).collect(),
                                score: round4(score),
                                kind: RetrievalKind::Example,
                            }
                        })
                    })
                    .collect()
            }
            kind => index
                .documents
                .iter()
                .filter(|d| d.kind == kind && Self::visible(&d.tenant_id, d.dataset_id.as_deref(), request))
                .filter_map(|doc| {
                    let score = similarity(&query, &format!("{} {}", doc.title, doc.body));
                    (score > 0.0).then(|| RetrievedItem {
                        id: doc.id.clone(),
                        title: doc.title.clone(),
                        snippet: doc.body.chars().take(500).collect(),
                        score: round4(score),
                        kind,
                    })
                })
                .collect(),
        };

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(request.limit);
        tracing::debug!(
            kind = request.kind.label(),
            tenant = %request.tenant_id,
            hits = scored.len(),
            "retrieval finished"
        );
        Ok(scored)
    }

    async fn store_example(&self, example: LearnedExample) -> Result<(), RetrievalError> {
        let question = example.question.trim().to_string();
        let sql = example.sql.trim().to_string();
        if question.is_empty() || sql.is_empty() {
            return Ok(());
        }
        let mut index = self.index.write().map_err(|_| RetrievalError::LockPoisoned)?;
        let now = Utc::now();
        let existing = index.examples.iter_mut().find(|s| {
            s.example.tenant_id == example.tenant_id
                && s.example.dataset_id == example.dataset_id
                && s.example.question == question
                && s.example.sql == sql
        });
        match existing {
            Some(stored) => {
                stored.example.quality_score = stored.example.quality_score.max(example.quality_score);
                if example.answer_summary.is_some() {
                    stored.example.answer_summary = example.answer_summary;
                }
                stored.updated_at = now;
            }
            None => index.examples.push(StoredExample {
                example: LearnedExample {
                    question,
                    sql,
                    ..example
                },
                updated_at: now,
            }),
        }
        Ok(())
    }
}
