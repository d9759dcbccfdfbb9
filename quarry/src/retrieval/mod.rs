//! Retrieval seam used to assemble prompt context.

mod memory;

pub use memory::InMemoryRetriever;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval backend error: {0}")]
    Backend(String),

    #[error("Retrieval index lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalKind {
    Schema,
    KnowledgeBase,
    Example,
}

impl RetrievalKind {
    /// Label used in packed prompt context.
    pub fn label(&self) -> &'static str {
        match self {
            RetrievalKind::Schema => "schema",
            RetrievalKind::KnowledgeBase => "kb_chunk",
            RetrievalKind::Example => "example",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub question: String,
    pub tenant_id: String,
    pub dataset_id: Option<String>,
    pub kind: RetrievalKind,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub kind: RetrievalKind,
}

/// A question/SQL pair promoted by the learning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedExample {
    pub tenant_id: String,
    pub dataset_id: Option<String>,
    pub question: String,
    pub rewritten_question: Option<String>,
    pub sql: String,
    pub answer_summary: Option<String>,
    pub quality_score: f64,
    pub source: String,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ranked items, best first, at most `request.limit`.
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedItem>, RetrievalError>;

    /// Store or refresh a worked example.
    async fn store_example(&self, example: LearnedExample) -> Result<(), RetrievalError>;
}

/// Render items as `[kind] title\nsnippet\n` blocks, stopping before `max_chars`.
///
/// Items with an empty snippet are skipped.
pub fn pack(items: &[RetrievedItem], max_chars: usize) -> String {
    let mut blocks = Vec::new();
    let mut used = 0;
    for item in items {
        let snippet = item.snippet.trim();
        if snippet.is_empty() {
            continue;
        }
        let title = if item.title.is_empty() { &item.id } else { &item.title };
        let block = format!("[{}] {}\n{}\n", item.kind.label(), title, snippet);
        let len = block.chars().count();
        if used + len > max_chars {
            break;
        }
        used += len;
        blocks.push(block);
    }
    blocks.join("\n")
}
