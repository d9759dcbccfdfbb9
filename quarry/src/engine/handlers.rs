//! Tool handlers and the dispatch table the engine runs plan steps through.
//!
//! A handler reads the goal, the tenant and the accumulated outputs, and
//! returns a [`ToolOutcome`]. Handlers never write to the store; the engine
//! records their outputs.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::anomaly;
use super::outputs::{ExecutionOutput, RetrievalOutput, StepOutputs, ToolOutput};
use super::summary::write_summary;
use super::verifier::SqlVerifier;
use crate::cache::{stable_hash, TtlCache};
use crate::catalog::ToolName;
use crate::database::{ExecutionError, QueryExecutor, QueryParams};
use crate::llm::TextGenerator;
use crate::logging::truncate_sql;
use crate::profile::UserProfile;
use crate::retrieval::{pack, RetrievalError, RetrievalKind, RetrievalRequest, RetrievedItem, Retriever};
use crate::risk::{assess_sql, RiskAssessment};
use crate::sql_generation::{AnswerShape, SqlGenerator, SqlRequest};
use crate::sql_guard::GuardError;
use crate::tenant::{PolicyError, TenantContext};
use crate::types::{Goal, PlanStep};

const LEARNING_CONTEXT_CHARS: usize = 2500;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing_sql_for_verification")]
    MissingSqlForVerification,

    #[error("missing_sql_for_execution")]
    MissingSqlForExecution,

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Read-only view of the run a handler executes in.
pub struct StepContext<'a> {
    pub goal: &'a Goal,
    pub step: &'a PlanStep,
    pub tenant: &'a TenantContext,
    pub profile: Option<&'a UserProfile>,
    /// Risky SQL may run without blocking: the run was auto-approved or
    /// carried the approval token for this step.
    pub approved: bool,
}

impl StepContext<'_> {
    pub fn question(&self) -> &str {
        self.goal.focus_question()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(ToolOutput),
    ApprovalRequired { reason: String, risk: RiskAssessment },
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>, outputs: &StepOutputs) -> Result<ToolOutcome, ToolError>;
}

pub type HandlerTable = HashMap<ToolName, Arc<dyn ToolHandler>>;

pub struct RetrievalHandler {
    retriever: Arc<dyn Retriever>,
    kind: RetrievalKind,
    limit: usize,
}

impl RetrievalHandler {
    pub fn new(retriever: Arc<dyn Retriever>, kind: RetrievalKind, limit: usize) -> Self {
        Self { retriever, kind, limit }
    }
}

#[async_trait]
impl ToolHandler for RetrievalHandler {
    async fn run(&self, ctx: &StepContext<'_>, _outputs: &StepOutputs) -> Result<ToolOutcome, ToolError> {
        let request = RetrievalRequest {
            question: ctx.question().to_string(),
            tenant_id: ctx.tenant.tenant_id().to_string(),
            dataset_id: ctx.goal.dataset_id.clone(),
            kind: self.kind,
            limit: self.limit,
        };
        let mut items = self.retriever.retrieve(&request).await?;
        if items.is_empty() && self.kind == RetrievalKind::Schema {
            items = ctx
                .tenant
                .table_snippets()
                .into_iter()
                .take(self.limit)
                .map(|(title, snippet)| RetrievedItem {
                    id: title.clone(),
                    title,
                    snippet,
                    score: 0.0,
                    kind: RetrievalKind::Schema,
                })
                .collect();
        }
        Ok(ToolOutcome::Completed(ToolOutput::Retrieval(RetrievalOutput::new(
            self.kind, items,
        ))))
    }
}

pub struct SqlGenerationHandler {
    generator: Arc<SqlGenerator>,
}

impl SqlGenerationHandler {
    pub fn new(generator: Arc<SqlGenerator>) -> Self {
        Self { generator }
    }
}

/// Packed retrieval outputs, one labelled section per retrieval tool.
pub(crate) fn learning_context(outputs: &StepOutputs) -> String {
    let sections = [
        ("schema_retrieval", &outputs.schema_retrieval),
        ("kb_retrieval", &outputs.kb_retrieval),
        ("example_retrieval", &outputs.example_retrieval),
    ];
    sections
        .iter()
        .filter_map(|(label, output)| {
            let output = output.as_ref()?;
            let packed = pack(&output.items, LEARNING_CONTEXT_CHARS);
            if packed.is_empty() {
                None
            } else {
                Some(format!("{}:\n{}", label, packed))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl ToolHandler for SqlGenerationHandler {
    async fn run(&self, ctx: &StepContext<'_>, outputs: &StepOutputs) -> Result<ToolOutcome, ToolError> {
        let request = SqlRequest::new(ctx.question())
            .with_dataset(ctx.goal.dataset_id.clone(), ctx.goal.dataset_version)
            .with_learning_context(learning_context(outputs));
        let result = self.generator.generate_sql(&request, ctx.tenant).await?;
        Ok(ToolOutcome::Completed(ToolOutput::SqlGeneration(Box::new(result))))
    }
}

pub struct VerifierHandler {
    verifier: SqlVerifier,
}

impl VerifierHandler {
    pub fn new(verifier: SqlVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl ToolHandler for VerifierHandler {
    async fn run(&self, ctx: &StepContext<'_>, outputs: &StepOutputs) -> Result<ToolOutcome, ToolError> {
        let sql = outputs
            .generated_sql()
            .ok_or(ToolError::MissingSqlForVerification)?;
        let verdict = self.verifier.verify(ctx.question(), sql, ctx.tenant).await;
        Ok(ToolOutcome::Completed(ToolOutput::Verification(verdict)))
    }
}

/// Runs guarded, dataset-scoped SQL with a statement timeout and a short-lived
/// result cache.
pub struct ExecutionHandler {
    executor: Arc<dyn QueryExecutor>,
    cache: TtlCache<ExecutionOutput>,
    result_ttl: Duration,
    timeout: Duration,
    max_rows: usize,
}

impl ExecutionHandler {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        cache: TtlCache<ExecutionOutput>,
        result_ttl: Duration,
        timeout: Duration,
        max_rows: usize,
    ) -> Self {
        Self {
            executor,
            cache,
            result_ttl,
            timeout,
            max_rows,
        }
    }
}

#[async_trait]
impl ToolHandler for ExecutionHandler {
    async fn run(&self, ctx: &StepContext<'_>, outputs: &StepOutputs) -> Result<ToolOutcome, ToolError> {
        let sql = outputs.generated_sql().ok_or(ToolError::MissingSqlForExecution)?;

        if !ctx.approved {
            let risk = assess_sql(sql);
            if risk.is_risky() {
                tracing::info!(
                    goal_id = %ctx.goal.goal_id,
                    reasons = ?risk.reasons,
                    "risky SQL needs approval"
                );
                return Ok(ToolOutcome::ApprovalRequired {
                    reason: "risky_sql_detected".to_string(),
                    risk,
                });
            }
        }

        let guard = ctx.tenant.guard();
        guard.validate(sql)?;

        let mut params = QueryParams::new();
        let scoped = match &ctx.goal.dataset_id {
            Some(dataset_id) => {
                let param = ctx.tenant.scope_param();
                params.insert(param.to_string(), Value::String(dataset_id.clone()));
                guard.enforce_dataset_filter(sql, param)?
            }
            None => sql.to_string(),
        };

        let key = stable_hash(&json!({
            "tenant": ctx.tenant.tenant_id(),
            "ds": ctx.goal.dataset_id,
            "v": ctx.goal.dataset_version,
            "sql": scoped.trim().trim_end_matches(';'),
            "params": params,
        }));
        if let Some(mut cached) = self.cache.get(&key) {
            tracing::debug!(goal_id = %ctx.goal.goal_id, "result cache hit");
            cached.cache_hit = true;
            return Ok(ToolOutcome::Completed(ToolOutput::Execution(Box::new(cached))));
        }

        tracing::info!(goal_id = %ctx.goal.goal_id, sql = %truncate_sql(&scoped), "executing SQL");
        let mut rows = self.executor.execute(&scoped, &params, self.timeout).await?;
        let row_count = rows.len();
        let output = if row_count == 1 && rows[0].len() == 1 {
            let value = rows[0].values().next().cloned();
            ExecutionOutput {
                sql: scoped,
                result_type: AnswerShape::Number,
                value,
                rows: Vec::new(),
                row_count,
                cache_hit: false,
            }
        } else {
            rows.truncate(self.max_rows);
            ExecutionOutput {
                sql: scoped,
                result_type: AnswerShape::Table,
                value: None,
                rows,
                row_count,
                cache_hit: false,
            }
        };
        self.cache.set(key, output.clone(), self.result_ttl);
        Ok(ToolOutcome::Completed(ToolOutput::Execution(Box::new(output))))
    }
}

pub struct AnomalyHandler;

#[async_trait]
impl ToolHandler for AnomalyHandler {
    async fn run(&self, _ctx: &StepContext<'_>, outputs: &StepOutputs) -> Result<ToolOutcome, ToolError> {
        let report = anomaly::scan(outputs.sql_execution.as_ref());
        Ok(ToolOutcome::Completed(ToolOutput::Anomalies(report)))
    }
}

pub struct SummaryHandler {
    narrator: Option<Arc<dyn TextGenerator>>,
}

impl SummaryHandler {
    pub fn new(narrator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { narrator }
    }
}

#[async_trait]
impl ToolHandler for SummaryHandler {
    async fn run(&self, ctx: &StepContext<'_>, outputs: &StepOutputs) -> Result<ToolOutcome, ToolError> {
        let style = ctx.profile.map(|p| p.response_style).unwrap_or_default();
        let summary = write_summary(&ctx.goal.goal_text, outputs, style, self.narrator.as_deref()).await;
        Ok(ToolOutcome::Completed(ToolOutput::Summary(summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteExecutor;
    use crate::retrieval::InMemoryRetriever;
    use crate::sql_generation::QuestionIntent;
    use crate::storage::test_support;
    use crate::tenant::TenantConfig;

    fn tenant() -> TenantContext {
        let config: TenantConfig = toml::from_str(
            r#"
            tenant_id = "retail"
            [tables.sales_transactions]
            description = "One row per sale"
            [tables.sales_transactions.columns.amount]
            [tables.sales_transactions.columns.region]
            "#,
        )
        .unwrap();
        TenantContext::new(config, "dataset_id").unwrap()
    }

    fn outputs_with_sql(sql: &str) -> StepOutputs {
        let mut result = crate::sql_generation::SqlGenerationResult::without_sql(
            QuestionIntent::AnalyticsQuery,
            "x",
        );
        result.sql = Some(sql.to_string());
        let mut outputs = StepOutputs::default();
        outputs.record(ToolOutput::SqlGeneration(Box::new(result)));
        outputs
    }

    fn executor() -> Arc<SqliteExecutor> {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE sales_transactions(dataset_id TEXT, region TEXT, amount REAL);
             INSERT INTO sales_transactions VALUES ('ds1', 'north', 10), ('ds1', 'south', 5), ('ds2', 'north', 100);",
        )
        .unwrap();
        Arc::new(db)
    }

    fn execution_handler() -> ExecutionHandler {
        ExecutionHandler::new(
            executor(),
            TtlCache::new("db_result", 100),
            Duration::from_secs(60),
            Duration::from_secs(5),
            300,
        )
    }

    #[tokio::test]
    async fn test_schema_retrieval_falls_back_to_table_snippets() {
        let tenant = tenant();
        let goal = test_support::goal();
        let step = PlanStep::new(goal.goal_id, 1, ToolName::SchemaRetrieval, "schema");
        let ctx = StepContext { goal: &goal, step: &step, tenant: &tenant, profile: None, approved: false };
        let handler = RetrievalHandler::new(Arc::new(InMemoryRetriever::new()), RetrievalKind::Schema, 8);
        let outcome = handler.run(&ctx, &StepOutputs::default()).await.unwrap();
        match outcome {
            ToolOutcome::Completed(ToolOutput::Retrieval(out)) => {
                assert_eq!(out.count, 1);
                assert_eq!(out.items[0].title, "Table sales_transactions");
                assert_eq!(out.items[0].snippet, "One row per sale. Columns: amount, region");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execution_scopes_and_caches() {
        let tenant = tenant();
        let goal = test_support::goal();
        let step = PlanStep::new(goal.goal_id, 1, ToolName::SqlExecution, "exec");
        let ctx = StepContext { goal: &goal, step: &step, tenant: &tenant, profile: None, approved: false };
        let handler = execution_handler();
        let outputs = outputs_with_sql("SELECT SUM(amount) FROM sales_transactions WHERE region = 'north' LIMIT 200");

        let first = handler.run(&ctx, &outputs).await.unwrap();
        let out = match first {
            ToolOutcome::Completed(ToolOutput::Execution(out)) => out,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(out.result_type, AnswerShape::Number);
        assert_eq!(out.value, Some(json!(10.0)));
        assert!(out.sql.contains("sales_transactions.dataset_id = :dataset_id"));
        assert!(!out.cache_hit);

        match handler.run(&ctx, &outputs).await.unwrap() {
            ToolOutcome::Completed(ToolOutput::Execution(out)) => assert!(out.cache_hit),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_risky_sql_requires_approval_unless_approved() {
        let tenant = tenant();
        let goal = test_support::goal();
        let step = PlanStep::new(goal.goal_id, 1, ToolName::SqlExecution, "exec");
        let handler = execution_handler();
        let outputs = outputs_with_sql("SELECT * FROM sales_transactions");

        let ctx = StepContext { goal: &goal, step: &step, tenant: &tenant, profile: None, approved: false };
        match handler.run(&ctx, &outputs).await.unwrap() {
            ToolOutcome::ApprovalRequired { reason, risk } => {
                assert_eq!(reason, "risky_sql_detected");
                assert!(risk.reasons.contains(&"select_star".to_string()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let ctx = StepContext { approved: true, ..ctx };
        match handler.run(&ctx, &outputs).await.unwrap() {
            ToolOutcome::Completed(ToolOutput::Execution(out)) => {
                assert_eq!(out.result_type, AnswerShape::Table);
                assert_eq!(out.row_count, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_sql_fails() {
        let tenant = tenant();
        let goal = test_support::goal();
        let step = PlanStep::new(goal.goal_id, 1, ToolName::SqlExecution, "exec");
        let ctx = StepContext { goal: &goal, step: &step, tenant: &tenant, profile: None, approved: true };
        let err = execution_handler()
            .run(&ctx, &StepOutputs::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing_sql_for_execution");
    }

    #[test]
    fn test_learning_context_sections() {
        let mut outputs = StepOutputs::default();
        outputs.record(ToolOutput::Retrieval(RetrievalOutput::new(
            RetrievalKind::KnowledgeBase,
            vec![RetrievedItem {
                id: "kb1".to_string(),
                title: "Revenue".to_string(),
                snippet: "Revenue is the sum of amount".to_string(),
                score: 0.9,
                kind: RetrievalKind::KnowledgeBase,
            }],
        )));
        outputs.record(ToolOutput::Retrieval(RetrievalOutput::new(RetrievalKind::Example, vec![])));
        assert_eq!(
            learning_context(&outputs),
            "kb_retrieval:\n[kb_chunk] Revenue\nRevenue is the sum of amount\n"
        );
    }
}
