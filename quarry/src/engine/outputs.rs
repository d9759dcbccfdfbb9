//! The step-output accumulator threaded through a run.
//!
//! Handlers read the accumulator and return a [`ToolOutput`]; only the engine
//! records outputs, so a handler never mutates another step's result.

use serde::{Deserialize, Serialize};

use crate::catalog::ToolName;
use crate::database::Row;
use crate::retrieval::{RetrievalKind, RetrievedItem};
use crate::sql_generation::{AnswerShape, SqlGenerationResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutput {
    pub kind: RetrievalKind,
    pub items: Vec<RetrievedItem>,
    pub count: usize,
}

impl RetrievalOutput {
    pub fn new(kind: RetrievalKind, items: Vec<RetrievedItem>) -> Self {
        Self {
            kind,
            count: items.len(),
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutput {
    pub approved: bool,
    pub reason: String,
    /// Guard-validated replacement for the generated SQL.
    pub corrected_sql: Option<String>,
    /// A proposed correction the guard rejected; `reason` carries the guard error.
    pub rejected_correction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// The statement as executed, after dataset scoping.
    pub sql: String,
    pub result_type: AnswerShape,
    /// Set for 1×1 results.
    pub value: Option<serde_json::Value>,
    /// At most `max_result_rows` rows.
    pub rows: Vec<Row>,
    /// Rows returned before truncation.
    pub row_count: usize,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub column: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
    /// Whether the summary came from the text-generation backend.
    #[serde(default)]
    pub narrative: bool,
}

/// Result of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Retrieval(RetrievalOutput),
    SqlGeneration(Box<SqlGenerationResult>),
    Verification(VerificationOutput),
    Execution(Box<ExecutionOutput>),
    Anomalies(AnomalyReport),
    Summary(SummaryOutput),
}

impl ToolOutput {
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// One optional slot per tool, serialized as a map keyed by tool name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_retrieval: Option<RetrievalOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kb_retrieval: Option<RetrievalOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_retrieval: Option<RetrievalOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_generation: Option<SqlGenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_verifier: Option<VerificationOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_execution: Option<ExecutionOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_scan: Option<AnomalyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_writer: Option<SummaryOutput>,
}

impl StepOutputs {
    /// Store `output` in its slot. A verifier correction replaces the
    /// generated SQL in place.
    pub fn record(&mut self, output: ToolOutput) {
        match output {
            ToolOutput::Retrieval(out) => match out.kind {
                RetrievalKind::Schema => self.schema_retrieval = Some(out),
                RetrievalKind::KnowledgeBase => self.kb_retrieval = Some(out),
                RetrievalKind::Example => self.example_retrieval = Some(out),
            },
            ToolOutput::SqlGeneration(out) => self.sql_generation = Some(*out),
            ToolOutput::Verification(out) => {
                if let (Some(corrected), Some(generation)) =
                    (&out.corrected_sql, self.sql_generation.as_mut())
                {
                    generation.sql = Some(corrected.clone());
                }
                self.sql_verifier = Some(out);
            }
            ToolOutput::Execution(out) => self.sql_execution = Some(*out),
            ToolOutput::Anomalies(out) => self.anomaly_scan = Some(out),
            ToolOutput::Summary(out) => self.summary_writer = Some(out),
        }
    }

    /// The SQL the next execution step would run.
    pub fn generated_sql(&self) -> Option<&str> {
        self.sql_generation
            .as_ref()
            .and_then(|g| g.sql.as_deref())
            .filter(|sql| !sql.trim().is_empty())
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary_writer.as_ref().map(|s| s.summary.as_str())
    }

    /// Tools with a recorded output, in catalog order.
    pub fn recorded_tools(&self) -> Vec<ToolName> {
        ToolName::ALL
            .iter()
            .copied()
            .filter(|tool| match tool {
                ToolName::SchemaRetrieval => self.schema_retrieval.is_some(),
                ToolName::KbRetrieval => self.kb_retrieval.is_some(),
                ToolName::ExampleRetrieval => self.example_retrieval.is_some(),
                ToolName::SqlGeneration => self.sql_generation.is_some(),
                ToolName::SqlVerifier => self.sql_verifier.is_some(),
                ToolName::SqlExecution => self.sql_execution.is_some(),
                ToolName::AnomalyScan => self.anomaly_scan.is_some(),
                ToolName::SummaryWriter => self.summary_writer.is_some(),
            })
            .collect()
    }
}
