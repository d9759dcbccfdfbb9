//! Persistence for goals, plan steps and user profiles.
//!
//! The engine relies only on atomic single-record updates, so any backend
//! that can read and replace one record at a time will do.

mod memory;
mod sqlite;

pub use memory::InMemoryGoalStore;
pub use sqlite::SqliteGoalStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::profile::UserProfile;
use crate::types::{Goal, GoalId, PlanStep};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Goal not found: {0}")]
    NotFound(GoalId),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Insert a goal together with its plan.
    async fn create_goal(&self, goal: &Goal, steps: &[PlanStep]) -> Result<(), StoreError>;

    async fn get_goal(&self, goal_id: GoalId) -> Result<Goal, StoreError>;

    async fn update_goal(&self, goal: &Goal) -> Result<(), StoreError>;

    /// Steps of `goal_id` in ascending `step_order`.
    async fn list_steps(&self, goal_id: GoalId) -> Result<Vec<PlanStep>, StoreError>;

    async fn update_step(&self, step: &PlanStep) -> Result<(), StoreError>;

    async fn get_profile(&self, user_id: &str, tenant_id: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;
}

/// Every step must belong to `goal` and orders must be exactly `1..=n`.
pub(crate) fn validate_plan(goal: &Goal, steps: &[PlanStep]) -> Result<(), StoreError> {
    let mut orders: Vec<u32> = Vec::with_capacity(steps.len());
    for step in steps {
        if step.goal_id != goal.goal_id {
            return Err(StoreError::InvalidPlan(format!(
                "step {} belongs to goal {}",
                step.step_id, step.goal_id
            )));
        }
        orders.push(step.step_order);
    }
    orders.sort_unstable();
    for (expected, actual) in (1u32..).zip(orders.iter()) {
        if expected != *actual {
            return Err(StoreError::InvalidPlan(format!(
                "step orders must be contiguous from 1, found {:?}",
                orders
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::catalog::ToolName;
    use crate::types::{Goal, GoalStatus, PlanStep, Priority, WorkingMemory};

    pub fn goal() -> Goal {
        let now = Utc::now();
        Goal {
            goal_id: Uuid::new_v4(),
            tenant_id: "retail".to_string(),
            dataset_id: Some("ds1".to_string()),
            dataset_version: 1,
            user_id: None,
            thread_id: None,
            title: "revenue".to_string(),
            goal_text: "revenue last 7 days".to_string(),
            priority: Priority::Normal,
            status: GoalStatus::Open,
            working_memory: WorkingMemory::default(),
            approval_token: None,
            requires_human_approval: false,
            result_summary: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn steps(goal: &Goal) -> Vec<PlanStep> {
        vec![
            PlanStep::new(goal.goal_id, 2, ToolName::SqlExecution, "Execute SQL"),
            PlanStep::new(goal.goal_id, 1, ToolName::SqlGeneration, "Generate SQL"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_validate_plan_orders() {
        let goal = goal();
        let mut steps = steps(&goal);
        assert!(validate_plan(&goal, &steps).is_ok());

        steps[0].step_order = 3;
        assert!(matches!(validate_plan(&goal, &steps), Err(StoreError::InvalidPlan(_))));

        steps[0].step_order = 1;
        assert!(matches!(validate_plan(&goal, &steps), Err(StoreError::InvalidPlan(_))));
    }
}
