//! Second-opinion check of generated SQL against the question.

use serde::Deserialize;
use std::sync::Arc;

use super::outputs::VerificationOutput;
use crate::llm::{parse_json_response, GenerationRequest, TextGenerator};
use crate::logging::truncate_sql;
use crate::sql_generation::{clamp_date_range, fix_date_literal_intervals, normalize_sql};
use crate::tenant::TenantContext;

const VERIFIER_SYSTEM_PROMPT: &str = "You review SQL written for an analytics question. \
Check that it answers the question, uses only the listed schema, and is read-only. \
Reply with JSON: {\"approved\": true|false, \"corrected_sql\": \"SELECT ...\" or null, \"reason\": \"...\"}";

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default = "default_approved")]
    approved: bool,
    #[serde(default)]
    corrected_sql: Option<String>,
    #[serde(default)]
    reason: String,
}

fn default_approved() -> bool {
    true
}

pub struct SqlVerifier {
    llm: Option<Arc<dyn TextGenerator>>,
    default_limit: u32,
}

impl SqlVerifier {
    pub fn new(llm: Option<Arc<dyn TextGenerator>>, default_limit: u32) -> Self {
        Self { llm, default_limit }
    }

    /// Approve `sql`, or propose a guard-validated replacement.
    ///
    /// An unavailable backend approves the statement unchanged.
    pub async fn verify(&self, question: &str, sql: &str, tenant: &TenantContext) -> VerificationOutput {
        let llm = match &self.llm {
            Some(llm) => llm,
            None => return approved("verifier_disabled"),
        };
        let user = format!(
            "{}\n## Question\n{}\n\n## SQL\n{}\n",
            tenant.schema_description(),
            question,
            sql
        );
        let request = GenerationRequest::new(VERIFIER_SYSTEM_PROMPT, user).with_max_tokens(400);
        let verdict: Verdict = match llm.generate(&request).await {
            Ok(text) => match parse_json_response(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable verifier response, keeping SQL");
                    return approved("verifier_unparseable");
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "verifier unavailable, keeping SQL");
                return approved("verifier_unavailable");
            }
        };

        let proposed = verdict
            .corrected_sql
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let proposed = match proposed {
            Some(p) => p,
            None => {
                return VerificationOutput {
                    approved: verdict.approved,
                    reason: verdict.reason,
                    corrected_sql: None,
                    rejected_correction: None,
                }
            }
        };

        let fixed = fix_date_literal_intervals(proposed);
        let clamped = clamp_date_range(&fixed, tenant.primary_time_column(), tenant.max_date_range_days());
        let candidate = normalize_sql(&clamped, self.default_limit);
        if candidate == sql {
            return VerificationOutput {
                approved: verdict.approved,
                reason: verdict.reason,
                corrected_sql: None,
                rejected_correction: None,
            };
        }
        match tenant.guard().validate(&candidate) {
            Ok(()) => {
                tracing::info!(sql = %truncate_sql(&candidate), "verifier replaced generated SQL");
                VerificationOutput {
                    approved: verdict.approved,
                    reason: verdict.reason,
                    corrected_sql: Some(candidate),
                    rejected_correction: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "verifier correction rejected by guard, keeping original SQL");
                VerificationOutput {
                    approved: verdict.approved,
                    reason: format!("correction_rejected: {}", e),
                    corrected_sql: None,
                    rejected_correction: Some(candidate),
                }
            }
        }
    }
}

fn approved(reason: &str) -> VerificationOutput {
    VerificationOutput {
        approved: true,
        reason: reason.to_string(),
        corrected_sql: None,
        rejected_correction: None,
    }
}
