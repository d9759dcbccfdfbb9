//! Goal Execution Engine.
//!
//! A run walks the goal's plan in ascending order and dispatches each runnable
//! step to the handler registered for its tool. Step state transitions:
//!
//! ```text
//! pending -> running -> completed | failed | blocked
//! blocked -> pending            (approval token presented)
//! running -> running            (next run, when the last one stopped mid-step)
//! ```
//!
//! A handler error fails the step and the goal and stops the run. Risky SQL
//! blocks the execution step, stores a fresh approval token on the goal and
//! stops the run until the token is presented.

mod anomaly;
mod approval;
mod handlers;
mod outputs;
mod run_guard;
mod summary;
mod verifier;

pub use anomaly::scan as scan_anomalies;
pub use approval::{new_token, token_matches};
pub use handlers::{
    AnomalyHandler, ExecutionHandler, HandlerTable, RetrievalHandler, SqlGenerationHandler, StepContext,
    SummaryHandler, ToolError, ToolHandler, ToolOutcome, VerifierHandler,
};
pub use outputs::{
    Anomaly, AnomalyReport, ExecutionOutput, RetrievalOutput, StepOutputs, SummaryOutput, ToolOutput,
    VerificationOutput,
};
pub use run_guard::{RunGuard, RunLease};
pub use summary::deterministic_summary;
pub use verifier::SqlVerifier;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::catalog::ToolName;
use crate::config::AgentConfig;
use crate::database::QueryExecutor;
use crate::llm::TextGenerator;
use crate::logging::truncate_chars;
use crate::planner::PlanBuilder;
use crate::profile::UserProfile;
use crate::retrieval::{LearnedExample, RetrievalKind, Retriever};
use crate::sql_generation::SqlGenerator;
use crate::storage::{GoalStore, StoreError};
use crate::tenant::{PolicyError, TenantContext, TenantError, TenantRegistry};
use crate::types::{Goal, GoalId, GoalStatus, GoalSubmission, PlanStep, StepStatus, WorkingMemory};

const STEP_ERROR_CHARS: usize = 2000;
const DEFAULT_FOCUS_QUESTION: &str = "Summarize key metrics for the selected data.";
const LEARNED_QUALITY: f64 = 0.9;
const LEARNED_SOURCE: &str = "agent_success";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Goal {0} is already running")]
    GoalBusy(GoalId),

    #[error("Goal not found: {0}")]
    NotFound(GoalId),

    #[error("No handler registered for tool {0}")]
    UnsupportedTool(ToolName),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Run risky SQL without asking for approval.
    pub auto_approve: bool,
    /// Maximum steps executed by this run.
    pub max_steps: u32,
    pub approval_token: Option<String>,
}

impl RunOptions {
    pub fn new(max_steps: u32) -> Self {
        Self {
            auto_approve: false,
            max_steps,
            approval_token: None,
        }
    }

    pub fn auto_approved(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    pub fn with_approval_token(mut self, token: impl Into<String>) -> Self {
        self.approval_token = Some(token.into());
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(20)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub goal_id: GoalId,
    pub status: GoalStatus,
    pub requires_human_approval: bool,
    /// Set only while the goal waits for approval.
    pub approval_token: Option<String>,
    pub result_summary: Option<String>,
    pub executed_steps: u32,
    pub step_outputs: StepOutputs,
}

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub store: Arc<dyn GoalStore>,
    pub tenants: Arc<TenantRegistry>,
    pub retriever: Arc<dyn Retriever>,
    pub executor: Arc<dyn QueryExecutor>,
    pub llm: Option<Arc<dyn TextGenerator>>,
}

pub struct GoalEngine {
    store: Arc<dyn GoalStore>,
    tenants: Arc<TenantRegistry>,
    retriever: Arc<dyn Retriever>,
    planner: PlanBuilder,
    generator: Arc<SqlGenerator>,
    handlers: HandlerTable,
    run_guard: RunGuard,
    config: AgentConfig,
}

impl GoalEngine {
    /// Build an engine with a handler for every catalog tool.
    pub fn new(deps: EngineDeps, config: AgentConfig) -> Self {
        let EngineDeps {
            store,
            tenants,
            retriever,
            executor,
            llm,
        } = deps;
        let enabled = |flag: bool| if flag { llm.clone() } else { None };

        let generator = Arc::new(SqlGenerator::new(llm.clone(), &config));
        let planner = PlanBuilder::new(enabled(config.planner.llm_enabled), config.planner.clone());
        let result_cache = if config.cache.enabled {
            TtlCache::new("db_result", config.cache.max_entries)
        } else {
            TtlCache::disabled("db_result")
        };

        let mut handlers: HandlerTable = HandlerTable::new();
        handlers.insert(
            ToolName::SchemaRetrieval,
            Arc::new(RetrievalHandler::new(retriever.clone(), RetrievalKind::Schema, 8)),
        );
        handlers.insert(
            ToolName::KbRetrieval,
            Arc::new(RetrievalHandler::new(retriever.clone(), RetrievalKind::KnowledgeBase, 8)),
        );
        handlers.insert(
            ToolName::ExampleRetrieval,
            Arc::new(RetrievalHandler::new(retriever.clone(), RetrievalKind::Example, 6)),
        );
        handlers.insert(
            ToolName::SqlGeneration,
            Arc::new(SqlGenerationHandler::new(generator.clone())),
        );
        handlers.insert(
            ToolName::SqlVerifier,
            Arc::new(VerifierHandler::new(SqlVerifier::new(
                enabled(config.execution.verifier_enabled),
                config.generation.default_limit,
            ))),
        );
        handlers.insert(
            ToolName::SqlExecution,
            Arc::new(ExecutionHandler::new(
                executor,
                result_cache,
                Duration::from_secs(config.cache.result_ttl_secs),
                Duration::from_millis(config.execution.statement_timeout_ms),
                config.execution.max_result_rows,
            )),
        );
        handlers.insert(ToolName::AnomalyScan, Arc::new(AnomalyHandler));
        handlers.insert(
            ToolName::SummaryWriter,
            Arc::new(SummaryHandler::new(enabled(config.execution.narrative_summaries))),
        );

        Self {
            store,
            tenants,
            retriever,
            planner,
            generator,
            handlers,
            run_guard: RunGuard::new(),
            config,
        }
    }

    /// Replace or add the handler for `tool`.
    pub fn with_handler(mut self, tool: ToolName, handler: Arc<dyn ToolHandler>) -> Self {
        self.handlers.insert(tool, handler);
        self
    }

    /// Remove the handler for `tool`; plans that use it are then rejected.
    pub fn without_handler(mut self, tool: ToolName) -> Self {
        self.handlers.remove(&tool);
        self
    }

    pub fn generator(&self) -> &SqlGenerator {
        &self.generator
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Plan and persist a new goal.
    pub async fn submit_goal(&self, submission: GoalSubmission) -> Result<(Goal, Vec<PlanStep>), EngineError> {
        let tenant = self.tenants.get(&submission.tenant_id)?;
        tenant.validate_question(&submission.goal_text)?;
        let profile = match &submission.user_id {
            Some(user_id) => Some(self.learn_profile(user_id, &tenant, &submission.goal_text).await?),
            None => None,
        };

        let plan = self.planner.build(&submission.goal_text, profile.as_ref()).await;
        if let Some((tool, _)) = plan.steps.iter().find(|(tool, _)| !self.handlers.contains_key(tool)) {
            return Err(EngineError::UnsupportedTool(*tool));
        }

        let now = Utc::now();
        let focus_question = match submission.goal_text.trim() {
            "" => DEFAULT_FOCUS_QUESTION.to_string(),
            text => text.to_string(),
        };
        let goal = Goal {
            goal_id: Uuid::new_v4(),
            tenant_id: submission.tenant_id,
            dataset_id: submission.dataset_id,
            dataset_version: submission.dataset_version,
            user_id: submission.user_id,
            thread_id: submission.thread_id,
            title: plan.title,
            goal_text: submission.goal_text,
            priority: submission.priority,
            status: GoalStatus::Open,
            working_memory: WorkingMemory {
                focus_question,
                ..WorkingMemory::default()
            },
            approval_token: None,
            requires_human_approval: false,
            result_summary: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let steps: Vec<PlanStep> = plan
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, (tool, title))| PlanStep::new(goal.goal_id, i as u32 + 1, tool, title))
            .collect();

        self.store.create_goal(&goal, &steps).await?;
        tracing::info!(
            goal_id = %goal.goal_id,
            tenant = %goal.tenant_id,
            steps = steps.len(),
            "goal submitted"
        );
        Ok((goal, steps))
    }

    async fn learn_profile(
        &self,
        user_id: &str,
        tenant: &TenantContext,
        text: &str,
    ) -> Result<UserProfile, EngineError> {
        let mut profile = self
            .store
            .get_profile(user_id, tenant.tenant_id())
            .await?
            .unwrap_or_else(|| UserProfile::new(user_id, tenant.tenant_id()));
        profile.learn_from_text(text);
        self.store.upsert_profile(&profile).await?;
        Ok(profile)
    }

    pub async fn get_goal(&self, goal_id: GoalId) -> Result<Goal, EngineError> {
        Ok(self.store.get_goal(goal_id).await?)
    }

    pub async fn list_steps(&self, goal_id: GoalId) -> Result<Vec<PlanStep>, EngineError> {
        Ok(self.store.list_steps(goal_id).await?)
    }

    /// Run options with the configured step budget.
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new(self.config.execution.default_max_steps)
    }

    /// Resume a goal waiting for approval with `token`.
    pub async fn approve(&self, goal_id: GoalId, token: &str) -> Result<RunReport, EngineError> {
        self.run(goal_id, self.run_options().with_approval_token(token))
            .await
    }

    /// Execute runnable steps of `goal_id` in order, at most `options.max_steps`.
    ///
    /// Returns `GoalBusy` while another run of the same goal is in progress.
    pub async fn run(&self, goal_id: GoalId, options: RunOptions) -> Result<RunReport, EngineError> {
        let _lease = self
            .run_guard
            .try_acquire(goal_id)
            .ok_or(EngineError::GoalBusy(goal_id))?;

        let mut goal = self.store.get_goal(goal_id).await?;
        if goal.status.is_terminal() {
            tracing::debug!(goal_id = %goal_id, status = goal.status.as_str(), "goal already finished");
            return Ok(report(&goal, 0));
        }
        let tenant = self.tenants.get(&goal.tenant_id)?;
        let profile = match &goal.user_id {
            Some(user_id) => self.store.get_profile(user_id, &goal.tenant_id).await?,
            None => None,
        };

        goal.status = GoalStatus::InProgress;
        goal.touch();
        self.store.update_goal(&goal).await?;

        let mut outputs = goal.working_memory.step_outputs.clone();
        let mut executed: u32 = 0;
        let steps = self.store.list_steps(goal_id).await?;

        for mut step in steps.into_iter().filter(|s| s.status.is_runnable()) {
            if executed >= options.max_steps {
                break;
            }

            let mut approved = options.auto_approve;
            if step.status == StepStatus::Blocked {
                if !token_matches(options.approval_token.as_deref(), goal.approval_token.as_deref()) {
                    tracing::info!(goal_id = %goal_id, step = step.step_order, "step still blocked, waiting for approval");
                    goal.status = GoalStatus::WaitingApproval;
                    break;
                }
                step.transition(StepStatus::Pending);
                goal.clear_approval();
                goal.status = GoalStatus::InProgress;
                goal.touch();
                self.store.update_goal(&goal).await?;
                self.store.update_step(&step).await?;
                approved = true;
                tracing::info!(goal_id = %goal_id, step = step.step_order, "approval accepted, step unblocked");
            }

            step.transition(StepStatus::Running);
            self.store.update_step(&step).await?;
            tracing::debug!(goal_id = %goal_id, step = step.step_order, tool = %step.tool_name, "step running");

            let handler = match self.handlers.get(&step.tool_name) {
                Some(h) => h.clone(),
                None => {
                    let err = EngineError::UnsupportedTool(step.tool_name);
                    self.fail_step(&mut goal, &mut step, &err.to_string()).await?;
                    break;
                }
            };
            let ctx = StepContext {
                goal: &goal,
                step: &step,
                tenant: &tenant,
                profile: profile.as_ref(),
                approved,
            };

            let outcome = handler.run(&ctx, &outputs).await;
            match outcome {
                Ok(ToolOutcome::Completed(output)) => {
                    step.output_payload = Some(output.to_payload());
                    step.error = None;
                    step.transition(StepStatus::Completed);
                    if let Err(e) = self.store.update_step(&step).await {
                        tracing::warn!(goal_id = %goal_id, step = step.step_order, error = %e, "could not record completed step");
                        self.save_progress(&mut goal, &outputs).await;
                        return Err(e.into());
                    }
                    outputs.record(output);
                    executed += 1;
                    tracing::info!(goal_id = %goal_id, step = step.step_order, tool = %step.tool_name, "step completed");
                }
                Ok(ToolOutcome::ApprovalRequired { reason, risk }) => {
                    let token = new_token();
                    step.requires_approval = true;
                    step.output_payload = Some(serde_json::json!({
                        "requires_approval": true,
                        "reason": reason,
                        "risk": risk,
                    }));
                    step.transition(StepStatus::Blocked);
                    self.store.update_step(&step).await?;
                    goal.status = GoalStatus::WaitingApproval;
                    goal.requires_human_approval = true;
                    goal.approval_token = Some(token);
                    goal.touch();
                    self.store.update_goal(&goal).await?;
                    tracing::info!(goal_id = %goal_id, step = step.step_order, reason = %reason, "step blocked for approval");
                    break;
                }
                Err(e) => {
                    tracing::warn!(goal_id = %goal_id, step = step.step_order, tool = %step.tool_name, error = %e, "step failed");
                    self.fail_step(&mut goal, &mut step, &e.to_string()).await?;
                    break;
                }
            }
        }

        self.finalize(&mut goal, outputs, &tenant).await?;
        Ok(report(&goal, executed))
    }

    /// Best-effort save of outputs from steps this run already committed.
    async fn save_progress(&self, goal: &mut Goal, outputs: &StepOutputs) {
        goal.working_memory.step_outputs = outputs.clone();
        goal.touch();
        if let Err(e) = self.store.update_goal(goal).await {
            tracing::warn!(goal_id = %goal.goal_id, error = %e, "could not save run progress");
        }
    }

    async fn fail_step(&self, goal: &mut Goal, step: &mut PlanStep, error: &str) -> Result<(), EngineError> {
        step.error = Some(truncate_chars(error, STEP_ERROR_CHARS));
        step.transition(StepStatus::Failed);
        self.store.update_step(step).await?;
        goal.status = GoalStatus::Failed;
        goal.touch();
        self.store.update_goal(goal).await?;
        Ok(())
    }

    async fn finalize(&self, goal: &mut Goal, outputs: StepOutputs, tenant: &TenantContext) -> Result<(), EngineError> {
        let steps = self.store.list_steps(goal.goal_id).await?;
        if steps.iter().all(|s| s.status.is_done()) {
            goal.status = GoalStatus::Completed;
            goal.completed_at = Some(Utc::now());
            goal.result_summary = outputs.summary().map(str::to_string);
            self.learn_from_success(goal, &outputs, tenant).await;
            tracing::info!(goal_id = %goal.goal_id, "goal completed");
        } else if !matches!(goal.status, GoalStatus::WaitingApproval | GoalStatus::Failed) {
            goal.status = GoalStatus::InProgress;
        }
        goal.working_memory.step_outputs = outputs;
        goal.touch();
        self.store.update_goal(goal).await?;
        Ok(())
    }

    /// Promote the executed SQL as a worked example. Failures are logged only.
    async fn learn_from_success(&self, goal: &Goal, outputs: &StepOutputs, tenant: &TenantContext) {
        let sql = match outputs.generated_sql() {
            Some(sql) => sql.to_string(),
            None => return,
        };
        let example = LearnedExample {
            tenant_id: tenant.tenant_id().to_string(),
            dataset_id: goal.dataset_id.clone(),
            question: goal.goal_text.clone(),
            rewritten_question: Some(goal.focus_question().to_string()),
            sql,
            answer_summary: Some(
                outputs
                    .summary()
                    .unwrap_or("Agent-completed analysis")
                    .to_string(),
            ),
            quality_score: LEARNED_QUALITY,
            source: LEARNED_SOURCE.to_string(),
        };
        if let Err(e) = self.retriever.store_example(example).await {
            tracing::warn!(goal_id = %goal.goal_id, error = %e, "failed to store learned example");
        }
    }
}

fn report(goal: &Goal, executed_steps: u32) -> RunReport {
    RunReport {
        goal_id: goal.goal_id,
        status: goal.status,
        requires_human_approval: goal.requires_human_approval,
        approval_token: if goal.requires_human_approval {
            goal.approval_token.clone()
        } else {
            None
        },
        result_summary: goal.result_summary.clone(),
        executed_steps,
        step_outputs: goal.working_memory.step_outputs.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteExecutor;
    use crate::retrieval::InMemoryRetriever;
    use crate::profile::UserProfile;
    use crate::storage::InMemoryGoalStore;
    use crate::tenant::TenantConfig;
    use crate::types::GoalSubmission;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedSummary;

    #[async_trait]
    impl ToolHandler for FixedSummary {
        async fn run(&self, _ctx: &StepContext<'_>, _outputs: &StepOutputs) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::Completed(ToolOutput::Summary(SummaryOutput {
                summary: "fixed summary".to_string(),
                narrative: false,
            })))
        }
    }

    /// Fails the first write that marks a step completed.
    struct CommitFailsOnce {
        inner: InMemoryGoalStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl GoalStore for CommitFailsOnce {
        async fn create_goal(&self, goal: &Goal, steps: &[PlanStep]) -> Result<(), StoreError> {
            self.inner.create_goal(goal, steps).await
        }

        async fn get_goal(&self, goal_id: GoalId) -> Result<Goal, StoreError> {
            self.inner.get_goal(goal_id).await
        }

        async fn update_goal(&self, goal: &Goal) -> Result<(), StoreError> {
            self.inner.update_goal(goal).await
        }

        async fn list_steps(&self, goal_id: GoalId) -> Result<Vec<PlanStep>, StoreError> {
            self.inner.list_steps(goal_id).await
        }

        async fn update_step(&self, step: &PlanStep) -> Result<(), StoreError> {
            if step.status == StepStatus::Completed && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Database("database is locked".to_string()));
            }
            self.inner.update_step(step).await
        }

        async fn get_profile(&self, user_id: &str, tenant_id: &str) -> Result<Option<UserProfile>, StoreError> {
            self.inner.get_profile(user_id, tenant_id).await
        }

        async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
            self.inner.upsert_profile(profile).await
        }
    }

    fn engine() -> GoalEngine {
        engine_with_store(Arc::new(InMemoryGoalStore::new()))
    }

    fn engine_with_store(store: Arc<dyn GoalStore>) -> GoalEngine {
        let config: TenantConfig = toml::from_str(
            r#"
            tenant_id = "retail"
            [tables.sales_transactions.columns.amount]
            [tables.sales_transactions.columns.region]
            "#,
        )
        .unwrap();
        let tenants = Arc::new(TenantRegistry::new());
        tenants.register(TenantContext::new(config, "dataset_id").unwrap()).unwrap();
        let mut agent = AgentConfig::default();
        agent.planner.llm_enabled = false;
        GoalEngine::new(
            EngineDeps {
                store,
                tenants,
                retriever: Arc::new(InMemoryRetriever::new()),
                executor: Arc::new(SqliteExecutor::open_in_memory().unwrap()),
                llm: None,
            },
            agent,
        )
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let engine = engine();
        let (goal, _) = engine
            .submit_goal(GoalSubmission::new("retail", "revenue by region"))
            .await
            .unwrap();

        let lease = engine.run_guard.try_acquire(goal.goal_id).unwrap();
        let err = engine.run(goal.goal_id, RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::GoalBusy(id) if id == goal.goal_id));
        assert_eq!(engine.get_goal(goal.goal_id).await.unwrap().status, GoalStatus::Open);

        drop(lease);
        let report = engine.run(goal.goal_id, RunOptions::default()).await.unwrap();
        assert_eq!(report.status, GoalStatus::Failed);
        assert!(!engine.run_guard.is_running(goal.goal_id));
    }

    #[tokio::test]
    async fn test_default_focus_question_for_blank_goal() {
        let engine = engine();
        let (goal, steps) = engine.submit_goal(GoalSubmission::new("retail", "  ")).await.unwrap();
        assert_eq!(goal.title, "Data analysis goal");
        assert_eq!(goal.working_memory.focus_question, DEFAULT_FOCUS_QUESTION);
        assert_eq!(steps.len(), 7);
        assert!(steps.iter().enumerate().all(|(i, s)| s.step_order == i as u32 + 1));
    }

    #[tokio::test]
    async fn test_replaced_handler_is_dispatched() {
        let engine = engine().with_handler(ToolName::SummaryWriter, Arc::new(FixedSummary));
        let (goal, _) = engine
            .submit_goal(GoalSubmission::new("retail", "revenue by region"))
            .await
            .unwrap();
        let mut steps = engine.list_steps(goal.goal_id).await.unwrap();
        for step in steps.iter_mut().filter(|s| s.tool_name != ToolName::SummaryWriter) {
            step.transition(StepStatus::Skipped);
            engine.store.update_step(step).await.unwrap();
        }

        let report = engine.run(goal.goal_id, RunOptions::default()).await.unwrap();
        assert_eq!(report.status, GoalStatus::Completed);
        assert_eq!(report.executed_steps, 1);
        assert_eq!(report.result_summary.as_deref(), Some("fixed summary"));
    }

    #[tokio::test]
    async fn test_step_interrupted_by_store_error_runs_again() {
        let store = Arc::new(CommitFailsOnce {
            inner: InMemoryGoalStore::new(),
            failed: AtomicBool::new(false),
        });
        let engine = engine_with_store(store).with_handler(ToolName::SummaryWriter, Arc::new(FixedSummary));
        let (goal, _) = engine
            .submit_goal(GoalSubmission::new("retail", "revenue by region"))
            .await
            .unwrap();
        let mut steps = engine.list_steps(goal.goal_id).await.unwrap();
        for step in steps.iter_mut().filter(|s| s.tool_name != ToolName::SummaryWriter) {
            step.transition(StepStatus::Skipped);
            engine.store.update_step(step).await.unwrap();
        }

        let err = engine.run(goal.goal_id, RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Database(_))));
        let stuck = engine.list_steps(goal.goal_id).await.unwrap();
        let summary = stuck.iter().find(|s| s.tool_name == ToolName::SummaryWriter).unwrap();
        assert_eq!(summary.status, StepStatus::Running);
        assert!(!engine.run_guard.is_running(goal.goal_id));

        let report = engine.run(goal.goal_id, RunOptions::default()).await.unwrap();
        assert_eq!(report.status, GoalStatus::Completed);
        assert_eq!(report.executed_steps, 1);
        assert_eq!(report.result_summary.as_deref(), Some("fixed summary"));
    }
}
