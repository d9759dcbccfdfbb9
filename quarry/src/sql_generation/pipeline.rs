use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::intent::{classify_intent, QuestionIntent};
use super::normalize::{clamp_date_range, fix_date_literal_intervals, normalize_sql};
use super::prompt::{sql_generation_request, GuardFeedback};
use super::result::{AnswerShape, CacheInfo, Confidence, SqlGenerationResult};
use crate::cache::{normalize_question, stable_hash, TtlCache};
use crate::config::{AgentConfig, GenerationConfig};
use crate::llm::{parse_json_response, LlmError, TextGenerator};
use crate::logging::truncate_sql;
use crate::tenant::{PolicyError, TenantContext};

/// Input to [`SqlGenerator::generate_sql`].
#[derive(Debug, Clone, Default)]
pub struct SqlRequest {
    pub question: String,
    pub dataset_id: Option<String>,
    pub dataset_version: i64,
    /// Packed retrieval context added to the prompt.
    pub learning_context: String,
    pub use_cache: bool,
}

impl SqlRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            use_cache: true,
            ..Default::default()
        }
    }

    pub fn with_dataset(mut self, dataset_id: Option<String>, version: i64) -> Self {
        self.dataset_id = dataset_id;
        self.dataset_version = version;
        self
    }

    pub fn with_learning_context(mut self, context: impl Into<String>) -> Self {
        self.learning_context = context.into();
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// JSON shape the backend is asked to return.
#[derive(Debug, Clone, Default, Deserialize)]
struct SqlCandidate {
    #[serde(default)]
    sql: String,
    #[serde(default)]
    answer_type: String,
    #[serde(default)]
    chart_hint: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    assumptions: Vec<String>,
}

enum AttemptOutcome {
    Accepted { sql: String, candidate: SqlCandidate },
    Rejected { feedback: GuardFeedback, candidate: SqlCandidate },
    Unavailable,
}

/// Guarded NL-to-SQL generation with caching.
pub struct SqlGenerator {
    llm: Option<Arc<dyn TextGenerator>>,
    cache: TtlCache<SqlGenerationResult>,
    config: GenerationConfig,
    ttl: Duration,
}

impl SqlGenerator {
    pub fn new(llm: Option<Arc<dyn TextGenerator>>, config: &AgentConfig) -> Self {
        let cache = if config.cache.enabled {
            TtlCache::new("llm_sql", config.cache.max_entries)
        } else {
            TtlCache::disabled("llm_sql")
        };
        Self {
            llm,
            cache,
            config: config.generation.clone(),
            ttl: Duration::from_secs(config.cache.sql_ttl_secs),
        }
    }

    pub fn model_name(&self) -> &str {
        self.llm.as_ref().map(|l| l.model_name()).unwrap_or("none")
    }

    /// Hash of everything that can change the generated SQL.
    pub fn cache_key(&self, request: &SqlRequest, tenant: &TenantContext) -> String {
        stable_hash(&json!({
            "tenant": tenant.tenant_id(),
            "dataset_id": request.dataset_id.as_deref().unwrap_or(""),
            "dataset_version": request.dataset_version,
            "question": normalize_question(&request.question),
            "config_hash": tenant.fingerprint(),
            "prompt_version": self.config.prompt_version,
            "model": self.model_name(),
        }))
    }

    /// Date-literal fix, date clamp, then LIMIT normalization.
    pub fn prepare_candidate(&self, sql: &str, tenant: &TenantContext) -> String {
        let fixed = fix_date_literal_intervals(sql);
        let clamped = clamp_date_range(&fixed, tenant.primary_time_column(), tenant.max_date_range_days());
        normalize_sql(&clamped, self.config.default_limit)
    }

    /// Turn `request.question` into guarded SQL.
    ///
    /// Only a policy violation is an error; every other failure is reported
    /// through `failure_reason` on the result.
    pub async fn generate_sql(
        &self,
        request: &SqlRequest,
        tenant: &TenantContext,
    ) -> Result<SqlGenerationResult, PolicyError> {
        let intent = classify_intent(&request.question);
        if let Some(reason) = intent.failure_reason() {
            tracing::info!(intent = ?intent, "question short-circuited before generation");
            return Ok(SqlGenerationResult::without_sql(intent, reason));
        }

        tenant.validate_question(&request.question)?;

        let key = self.cache_key(request, tenant);
        if request.use_cache {
            if let Some(mut cached) = self.cache.get(&key) {
                tracing::debug!(key = %&key[..8], "sql cache hit");
                cached.confidence = Confidence::High;
                cached.repairs = 0;
                cached.cache_info = CacheInfo {
                    hit: true,
                    key_prefix: Some(key[..8].to_string()),
                };
                return Ok(cached);
            }
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;
        let mut feedback: Option<GuardFeedback> = None;
        let mut last_candidate: Option<SqlCandidate> = None;
        let mut accepted: Option<String> = None;

        while attempts < max_attempts {
            attempts += 1;
            match self.attempt(request, tenant, feedback.as_ref()).await {
                AttemptOutcome::Accepted { sql, candidate } => {
                    last_candidate = Some(candidate);
                    accepted = Some(sql);
                    break;
                }
                AttemptOutcome::Rejected { feedback: fb, candidate } => {
                    tracing::warn!(attempt = attempts, error = %fb.error, "SQL candidate rejected by guard");
                    last_candidate = Some(candidate);
                    feedback = Some(fb);
                }
                AttemptOutcome::Unavailable => {
                    tracing::warn!(attempt = attempts, "text-generation backend returned no candidate");
                    feedback = Some(GuardFeedback::new("llm_unavailable", tenant));
                }
            }
        }

        let candidate = last_candidate.unwrap_or_default();
        let confidence = match (&accepted, attempts) {
            (Some(_), 1) => Confidence::High,
            (Some(_), _) => Confidence::Medium,
            (None, _) => Confidence::Low,
        };
        let failure_reason = match &accepted {
            Some(_) => None,
            None => Some(
                feedback
                    .map(|f| f.error)
                    .unwrap_or_else(|| "generation_failed".to_string()),
            ),
        };

        let result = SqlGenerationResult {
            sql: accepted,
            answer_type: AnswerShape::parse_lenient(&candidate.answer_type),
            assumptions: candidate.assumptions,
            confidence,
            intent: QuestionIntent::AnalyticsQuery,
            repairs: attempts - 1,
            model_name: self.llm.as_ref().map(|l| l.model_name().to_string()),
            failure_reason,
            cache_info: CacheInfo::default(),
            chart_hint: candidate.chart_hint.unwrap_or_else(|| "none".to_string()),
            summary: candidate.summary,
        };

        if result.is_success() && request.use_cache {
            self.cache.set(key, result.clone(), self.ttl);
        }
        tracing::info!(
            success = result.is_success(),
            repairs = result.repairs,
            confidence = ?result.confidence,
            "SQL generation finished"
        );
        Ok(result)
    }

    async fn attempt(
        &self,
        request: &SqlRequest,
        tenant: &TenantContext,
        feedback: Option<&GuardFeedback>,
    ) -> AttemptOutcome {
        let llm = match &self.llm {
            Some(llm) => llm,
            None => return AttemptOutcome::Unavailable,
        };
        let prompt = sql_generation_request(
            &request.question,
            tenant,
            &request.learning_context,
            feedback,
            &self.config,
        );
        let text = match llm.generate(&prompt).await {
            Ok(text) => text,
            Err(LlmError::Unavailable) => return AttemptOutcome::Unavailable,
            Err(e) => {
                tracing::warn!(error = %e, "text-generation call failed");
                return AttemptOutcome::Unavailable;
            }
        };
        let candidate: SqlCandidate = match parse_json_response(&text) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable SQL candidate");
                return AttemptOutcome::Unavailable;
            }
        };
        if candidate.sql.trim().is_empty() {
            return AttemptOutcome::Unavailable;
        }

        let sql = self.prepare_candidate(&candidate.sql, tenant);
        match tenant.guard().validate(&sql) {
            Ok(()) => {
                tracing::debug!(sql = %truncate_sql(&sql), "SQL candidate accepted");
                AttemptOutcome::Accepted { sql, candidate }
            }
            Err(e) => AttemptOutcome::Rejected {
                feedback: GuardFeedback::new(e.to_string(), tenant),
                candidate,
            },
        }
    }
}
