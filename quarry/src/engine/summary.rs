//! Final answer text for a goal.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::outputs::{ExecutionOutput, StepOutputs, SummaryOutput};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::profile::ResponseStyle;
use crate::sql_generation::AnswerShape;

const NARRATIVE_SYSTEM_PROMPT: &str = "You are a data analyst assistant. Given a user's question, \
the SQL that answered it, and the query results, write a concise 1-3 sentence narrative that \
explains the data in plain business English. Do NOT include SQL. Return ONLY the narrative text.";
const NARRATIVE_PREVIEW_ROWS: usize = 20;
const MAX_NUMBERS: usize = 200;

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("valid regex"));

/// `Goal: … | Result: … | Rows returned: … | Anomalies found: …`.
pub fn deterministic_summary(goal_text: &str, outputs: &StepOutputs, style: ResponseStyle) -> String {
    let mut parts = vec![format!("Goal: {}", goal_text)];
    if let Some(execution) = &outputs.sql_execution {
        match execution.result_type {
            AnswerShape::Number => parts.push(format!(
                "Result: {}",
                display_value(execution.value.as_ref().unwrap_or(&Value::Null))
            )),
            AnswerShape::Table => parts.push(format!("Rows returned: {}", execution.row_count)),
            AnswerShape::Text => {}
        }
    }
    if let Some(report) = &outputs.anomaly_scan {
        if report.count > 0 {
            parts.push(format!("Anomalies found: {}", report.count));
        }
    }
    let mut summary = parts.join(" | ");
    if style == ResponseStyle::Detailed {
        let steps: Vec<&str> = outputs.recorded_tools().iter().map(|t| t.as_str()).collect();
        summary.push_str(". Steps executed: ");
        summary.push_str(&steps.join(", "));
    }
    summary
}

/// Ask the backend for a narrative; keep it only when every number it cites
/// appears in the result.
pub async fn write_summary(
    goal_text: &str,
    outputs: &StepOutputs,
    style: ResponseStyle,
    narrator: Option<&dyn TextGenerator>,
) -> SummaryOutput {
    let fallback = deterministic_summary(goal_text, outputs, style);
    let (narrator, execution) = match (narrator, outputs.sql_execution.as_ref()) {
        (Some(n), Some(e)) => (n, e),
        _ => {
            return SummaryOutput {
                summary: fallback,
                narrative: false,
            }
        }
    };

    let request = GenerationRequest::new(NARRATIVE_SYSTEM_PROMPT, narrative_prompt(goal_text, execution))
        .with_temperature(0.3)
        .with_max_tokens(300);
    match narrator.generate(&request).await {
        Ok(text) if !text.trim().is_empty() && narrative_supported(text.trim(), execution) => SummaryOutput {
            summary: text.trim().to_string(),
            narrative: true,
        },
        Ok(_) => {
            tracing::warn!("narrative cites numbers not present in the result, using deterministic summary");
            SummaryOutput {
                summary: fallback,
                narrative: false,
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "narrative unavailable");
            SummaryOutput {
                summary: fallback,
                narrative: false,
            }
        }
    }
}

fn narrative_prompt(goal_text: &str, execution: &ExecutionOutput) -> String {
    let data = match execution.result_type {
        AnswerShape::Number => format!(
            "Result: {}",
            display_value(execution.value.as_ref().unwrap_or(&Value::Null))
        ),
        _ => {
            let preview: Vec<&crate::database::Row> =
                execution.rows.iter().take(NARRATIVE_PREVIEW_ROWS).collect();
            format!(
                "Result ({} rows, showing first {}):\n{}",
                execution.row_count,
                preview.len(),
                serde_json::to_string(&preview).unwrap_or_default()
            )
        }
    };
    format!("Question: {}\nSQL: {}\n{}", goal_text, execution.sql, data)
}

/// Every number in `narrative` must be within 1% of a number in the result.
pub(crate) fn narrative_supported(narrative: &str, execution: &ExecutionOutput) -> bool {
    let cited = extract_numbers(narrative);
    if cited.is_empty() {
        return true;
    }
    let known = result_numbers(execution);
    if known.is_empty() {
        return false;
    }
    cited.iter().all(|n| {
        known
            .iter()
            .any(|a| (n - a).abs() <= f64::max(1e-6, a.abs() * 0.01))
    })
}

fn extract_numbers(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .collect()
}

fn result_numbers(execution: &ExecutionOutput) -> Vec<f64> {
    match execution.result_type {
        AnswerShape::Number => execution
            .value
            .as_ref()
            .and_then(value_as_f64)
            .into_iter()
            .collect(),
        AnswerShape::Table => execution
            .rows
            .iter()
            .flat_map(|row| row.values())
            .filter_map(|v| v.as_f64())
            .take(MAX_NUMBERS)
            .collect(),
        AnswerShape::Text => Vec::new(),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::outputs::{AnomalyReport, ToolOutput};
    use crate::llm::ScriptedTextGenerator;
    use serde_json::json;

    fn number_outputs(value: Value) -> StepOutputs {
        let mut outputs = StepOutputs::default();
        outputs.record(ToolOutput::Execution(Box::new(ExecutionOutput {
            sql: "SELECT SUM(amount) FROM sales LIMIT 200".to_string(),
            result_type: AnswerShape::Number,
            value: Some(value),
            rows: Vec::new(),
            row_count: 1,
            cache_hit: false,
        })));
        outputs
    }

    #[test]
    fn test_deterministic_summary_styles() {
        let mut outputs = number_outputs(json!(1250.5));
        outputs.record(ToolOutput::Anomalies(AnomalyReport::default()));
        assert_eq!(
            deterministic_summary("revenue last 7 days", &outputs, ResponseStyle::Concise),
            "Goal: revenue last 7 days | Result: 1250.5"
        );
        assert_eq!(
            deterministic_summary("revenue last 7 days", &outputs, ResponseStyle::Detailed),
            "Goal: revenue last 7 days | Result: 1250.5. Steps executed: sql_execution, anomaly_scan"
        );
    }

    #[tokio::test]
    async fn test_grounded_narrative_is_used() {
        let outputs = number_outputs(json!(1250.5));
        let llm = ScriptedTextGenerator::new("narrator")
            .with_responses(["Revenue reached 1,250.5 over the last 7 days."]);
        let out = write_summary("revenue last 7 days", &outputs, ResponseStyle::Concise, Some(&llm)).await;
        assert!(!out.narrative, "7 is not in the result");

        let llm = ScriptedTextGenerator::new("narrator").with_responses(["Revenue reached 1,250.5."]);
        let out = write_summary("revenue", &outputs, ResponseStyle::Concise, Some(&llm)).await;
        assert!(out.narrative);
        assert_eq!(out.summary, "Revenue reached 1,250.5.");
    }

    #[tokio::test]
    async fn test_unavailable_narrator_falls_back() {
        let outputs = number_outputs(json!(3));
        let llm = ScriptedTextGenerator::unavailable("narrator");
        let out = write_summary("orders", &outputs, ResponseStyle::Concise, Some(&llm)).await;
        assert_eq!(out.summary, "Goal: orders | Result: 3");
        assert!(!out.narrative);
    }
}
