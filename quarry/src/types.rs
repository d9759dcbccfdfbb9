//! Core records for goals and their plan steps.
//!
//! A `Goal` owns an ordered list of `PlanStep`s. Both are created at submission
//! time and afterwards mutated only by the `GoalEngine`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ToolName;
use crate::engine::StepOutputs;

pub type GoalId = Uuid;
pub type StepId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Goal lifecycle: `open → in_progress → {waiting_approval, failed, completed}`,
/// and `waiting_approval → in_progress` on a valid approval token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Open,
    InProgress,
    WaitingApproval,
    Failed,
    Completed,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Open => "open",
            GoalStatus::InProgress => "in_progress",
            GoalStatus::WaitingApproval => "waiting_approval",
            GoalStatus::Failed => "failed",
            GoalStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GoalStatus::Failed | GoalStatus::Completed)
    }
}

/// Step lifecycle: `pending → running → {completed, failed, blocked}`,
/// and `blocked → pending` when the goal's approval token is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Blocked,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Blocked => "blocked",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Whether a run may pick this step up. `Running` is only seen here when
    /// an earlier run stopped before the step's outcome was stored.
    pub fn is_runnable(&self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::Running | StepStatus::Blocked)
    }

    /// Terminal states that count towards goal completion.
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Per-goal scratch state carried across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkingMemory {
    /// The question the SQL steps answer.
    pub focus_question: String,
    /// Accumulated tool outputs keyed by tool name.
    #[serde(default)]
    pub step_outputs: StepOutputs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub goal_id: GoalId,
    pub tenant_id: String,
    pub dataset_id: Option<String>,
    /// Version of the dataset snapshot; part of the SQL cache key.
    #[serde(default)]
    pub dataset_version: i64,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub title: String,
    pub goal_text: String,
    pub priority: Priority,
    pub status: GoalStatus,
    pub working_memory: WorkingMemory,
    pub approval_token: Option<String>,
    pub requires_human_approval: bool,
    pub result_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Goal {
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn focus_question(&self) -> &str {
        if self.working_memory.focus_question.trim().is_empty() {
            &self.goal_text
        } else {
            &self.working_memory.focus_question
        }
    }

    pub(crate) fn clear_approval(&mut self) {
        self.requires_human_approval = false;
        self.approval_token = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub step_id: StepId,
    pub goal_id: GoalId,
    /// 1-based, unique and contiguous within a goal.
    pub step_order: u32,
    pub title: String,
    pub description: String,
    pub tool_name: ToolName,
    pub status: StepStatus,
    pub requires_approval: bool,
    #[serde(default)]
    pub input_payload: serde_json::Value,
    pub output_payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanStep {
    pub fn new(goal_id: GoalId, step_order: u32, tool_name: ToolName, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: Uuid::new_v4(),
            goal_id,
            step_order,
            title: title.into(),
            description: tool_name.description().to_string(),
            tool_name,
            status: StepStatus::Pending,
            requires_approval: false,
            input_payload: serde_json::Value::Object(Default::default()),
            output_payload: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn transition(&mut self, status: StepStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A goal as submitted by a caller, before planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalSubmission {
    pub tenant_id: String,
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub dataset_version: i64,
    pub goal_text: String,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl GoalSubmission {
    pub fn new(tenant_id: impl Into<String>, goal_text: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            goal_text: goal_text.into(),
            ..Default::default()
        }
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>, version: i64) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self.dataset_version = version;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
