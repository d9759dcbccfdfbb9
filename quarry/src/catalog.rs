//! Fixed catalog of tools a plan step may invoke.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tool identifier for a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    SchemaRetrieval,
    KbRetrieval,
    ExampleRetrieval,
    SqlGeneration,
    SqlVerifier,
    SqlExecution,
    AnomalyScan,
    SummaryWriter,
}

impl ToolName {
    /// Every tool in catalog order.
    pub const ALL: [ToolName; 8] = [
        ToolName::SchemaRetrieval,
        ToolName::KbRetrieval,
        ToolName::ExampleRetrieval,
        ToolName::SqlGeneration,
        ToolName::SqlVerifier,
        ToolName::SqlExecution,
        ToolName::AnomalyScan,
        ToolName::SummaryWriter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SchemaRetrieval => "schema_retrieval",
            ToolName::KbRetrieval => "kb_retrieval",
            ToolName::ExampleRetrieval => "example_retrieval",
            ToolName::SqlGeneration => "sql_generation",
            ToolName::SqlVerifier => "sql_verifier",
            ToolName::SqlExecution => "sql_execution",
            ToolName::AnomalyScan => "anomaly_scan",
            ToolName::SummaryWriter => "summary_writer",
        }
    }

    /// One-line description used as the default step description and in planning prompts.
    pub fn description(&self) -> &'static str {
        match self {
            ToolName::SchemaRetrieval => "Retrieve relevant tables/columns/joins for the goal.",
            ToolName::KbRetrieval => "Retrieve business docs and KPI definitions.",
            ToolName::ExampleRetrieval => "Retrieve similar successful Q->SQL examples.",
            ToolName::SqlGeneration => "Generate SQL candidate for the target question.",
            ToolName::SqlVerifier => "Verify SQL-question alignment and safe constraints.",
            ToolName::SqlExecution => "Execute SQL and collect structured results.",
            ToolName::AnomalyScan => "Check for outliers/sharp changes in the result.",
            ToolName::SummaryWriter => "Write concise analyst-style summary.",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown tool: {0}")]
pub struct UnknownTool(pub String);

impl FromStr for ToolName {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .iter()
            .copied()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}
