use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::llm::GenerationRequest;
use crate::tenant::TenantContext;

const SQL_SYSTEM_PROMPT: &str = r#"You convert natural language analytics questions into a single read-only SQL SELECT statement.

Rules:
1. Generate ONLY one SELECT statement; never modify data.
2. Use only the tables and columns listed in the schema.
3. No comments, no markdown, no trailing semicolon.
4. Do NOT add dataset_id filters; the system injects them.
5. Reply with a JSON object:
{"sql": "SELECT ...", "answer_type": "number|table|text", "chart_hint": "line|bar|pie|area|none", "summary": "one sentence", "assumptions": ["..."]}"#;

/// Structured feedback from a rejected attempt, fed into the next prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardFeedback {
    pub error: String,
    pub allowed_tables: Vec<String>,
    pub allowed_columns: Vec<String>,
    pub time_column: Option<String>,
}

impl GuardFeedback {
    pub fn new(error: impl Into<String>, tenant: &TenantContext) -> Self {
        Self {
            error: error.into(),
            allowed_tables: tenant.guard().allowed_tables(),
            allowed_columns: tenant.guard().allowed_columns(),
            time_column: tenant.primary_time_column().map(str::to_string),
        }
    }

    fn render(&self) -> String {
        format!(
            "Previous attempt failed. Error: {}\nAllowed tables: {}\nAllowed columns: {}\nTime column: {}",
            self.error,
            self.allowed_tables.join(", "),
            self.allowed_columns.join(", "),
            self.time_column.as_deref().unwrap_or("none")
        )
    }
}

pub(crate) fn sql_generation_request(
    question: &str,
    tenant: &TenantContext,
    learning_context: &str,
    feedback: Option<&GuardFeedback>,
    config: &GenerationConfig,
) -> GenerationRequest {
    let mut user = String::new();
    user.push_str(tenant.schema_description());
    if !tenant.metrics_description().is_empty() {
        user.push('\n');
        user.push_str(tenant.metrics_description());
    }
    if !learning_context.trim().is_empty() {
        user.push_str("\n## Retrieved Context\n");
        user.push_str(learning_context.trim());
        user.push('\n');
    }
    user.push_str(&format!("\n## Question\n{}\n", question));
    user.push_str(&format!(
        "\n## Context\n- Timezone: {}\n- Today: {}\n",
        config.timezone,
        Utc::now().date_naive().format("%Y-%m-%d")
    ));
    if let Some(feedback) = feedback {
        user.push('\n');
        user.push_str(&feedback.render());
        user.push('\n');
    }
    user.push_str("\nReturn ONLY the JSON object.");

    GenerationRequest::new(SQL_SYSTEM_PROMPT, user)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
}
