//! In-memory goal store for tests and ephemeral use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{validate_plan, GoalStore, StoreError};
use crate::profile::UserProfile;
use crate::types::{Goal, GoalId, PlanStep};

#[derive(Default)]
pub struct InMemoryGoalStore {
    goals: RwLock<HashMap<GoalId, Goal>>,
    steps: RwLock<HashMap<GoalId, Vec<PlanStep>>>,
    profiles: RwLock<HashMap<(String, String), UserProfile>>,
}

impl InMemoryGoalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GoalStore for InMemoryGoalStore {
    async fn create_goal(&self, goal: &Goal, steps: &[PlanStep]) -> Result<(), StoreError> {
        validate_plan(goal, steps)?;
        let mut ordered = steps.to_vec();
        ordered.sort_by_key(|s| s.step_order);

        let mut goals = self.goals.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut all_steps = self.steps.write().map_err(|_| StoreError::LockPoisoned)?;
        goals.insert(goal.goal_id, goal.clone());
        all_steps.insert(goal.goal_id, ordered);
        Ok(())
    }

    async fn get_goal(&self, goal_id: GoalId) -> Result<Goal, StoreError> {
        let goals = self.goals.read().map_err(|_| StoreError::LockPoisoned)?;
        goals.get(&goal_id).cloned().ok_or(StoreError::NotFound(goal_id))
    }

    async fn update_goal(&self, goal: &Goal) -> Result<(), StoreError> {
        let mut goals = self.goals.write().map_err(|_| StoreError::LockPoisoned)?;
        match goals.get_mut(&goal.goal_id) {
            Some(existing) => {
                *existing = goal.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(goal.goal_id)),
        }
    }

    async fn list_steps(&self, goal_id: GoalId) -> Result<Vec<PlanStep>, StoreError> {
        let steps = self.steps.read().map_err(|_| StoreError::LockPoisoned)?;
        steps.get(&goal_id).cloned().ok_or(StoreError::NotFound(goal_id))
    }

    async fn update_step(&self, step: &PlanStep) -> Result<(), StoreError> {
        let mut steps = self.steps.write().map_err(|_| StoreError::LockPoisoned)?;
        let plan = steps
            .get_mut(&step.goal_id)
            .ok_or(StoreError::NotFound(step.goal_id))?;
        match plan.iter_mut().find(|s| s.step_id == step.step_id) {
            Some(existing) => {
                *existing = step.clone();
                Ok(())
            }
            None => Err(StoreError::InvalidPlan(format!("unknown step {}", step.step_id))),
        }
    }

    async fn get_profile(&self, user_id: &str, tenant_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let profiles = self.profiles.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(profiles
            .get(&(user_id.to_string(), tenant_id.to_string()))
            .cloned())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().map_err(|_| StoreError::LockPoisoned)?;
        profiles.insert(
            (profile.user_id.clone(), profile.tenant_id.clone()),
            profile.clone(),
        );
        Ok(())
    }
}
