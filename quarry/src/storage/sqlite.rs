//! SQLite-backed goal store. Records are kept as JSON payloads next to the
//! few columns needed for lookups and ordering.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{validate_plan, GoalStore, StoreError};
use crate::profile::UserProfile;
use crate::types::{Goal, GoalId, PlanStep};

const SCHEMA: &str = "BEGIN;
CREATE TABLE IF NOT EXISTS goals(
    goal_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS plan_steps(
    step_id TEXT PRIMARY KEY,
    goal_id TEXT NOT NULL REFERENCES goals(goal_id),
    step_order INTEGER NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    UNIQUE(goal_id, step_order)
);
CREATE TABLE IF NOT EXISTS user_profiles(
    user_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY(user_id, tenant_id)
);
CREATE INDEX IF NOT EXISTS idx_goals_tenant ON goals(tenant_id);
COMMIT;";

#[derive(Clone)]
pub struct SqliteGoalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGoalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl GoalStore for SqliteGoalStore {
    async fn create_goal(&self, goal: &Goal, steps: &[PlanStep]) -> Result<(), StoreError> {
        validate_plan(goal, steps)?;
        let goal_payload = serde_json::to_string(goal)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO goals(goal_id, tenant_id, status, payload, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                goal.goal_id.to_string(),
                goal.tenant_id,
                goal.status.as_str(),
                goal_payload,
                goal.updated_at.to_rfc3339()
            ],
        )?;
        for step in steps {
            tx.execute(
                "INSERT INTO plan_steps(step_id, goal_id, step_order, status, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    step.step_id.to_string(),
                    step.goal_id.to_string(),
                    step.step_order,
                    step.status.as_str(),
                    serde_json::to_string(step)?
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_goal(&self, goal_id: GoalId) -> Result<Goal, StoreError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM goals WHERE goal_id = ?1",
                params![goal_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Err(StoreError::NotFound(goal_id)),
        }
    }

    async fn update_goal(&self, goal: &Goal) -> Result<(), StoreError> {
        let payload = serde_json::to_string(goal)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE goals SET status = ?2, payload = ?3, updated_at = ?4 WHERE goal_id = ?1",
            params![
                goal.goal_id.to_string(),
                goal.status.as_str(),
                payload,
                goal.updated_at.to_rfc3339()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(goal.goal_id));
        }
        Ok(())
    }

    async fn list_steps(&self, goal_id: GoalId) -> Result<Vec<PlanStep>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM plan_steps WHERE goal_id = ?1 ORDER BY step_order ASC")?;
        let payloads = stmt
            .query_map(params![goal_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if payloads.is_empty() {
            let exists: bool = conn
                .prepare("SELECT 1 FROM goals WHERE goal_id = ?1")?
                .exists(params![goal_id.to_string()])?;
            if !exists {
                return Err(StoreError::NotFound(goal_id));
            }
        }
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StoreError::from))
            .collect()
    }

    async fn update_step(&self, step: &PlanStep) -> Result<(), StoreError> {
        let payload = serde_json::to_string(step)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE plan_steps SET status = ?2, payload = ?3 WHERE step_id = ?1",
            params![step.step_id.to_string(), step.status.as_str(), payload],
        )?;
        if changed == 0 {
            return Err(StoreError::InvalidPlan(format!("unknown step {}", step.step_id)));
        }
        Ok(())
    }

    async fn get_profile(&self, user_id: &str, tenant_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM user_profiles WHERE user_id = ?1 AND tenant_id = ?2",
                params![user_id, tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let payload = serde_json::to_string(profile)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_profiles(user_id, tenant_id, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, tenant_id) DO UPDATE SET payload = excluded.payload",
            params![profile.user_id, profile.tenant_id, payload],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{goal, steps};
    use crate::types::{GoalStatus, StepStatus};

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goals.db");
        let mut goal = goal();
        {
            let store = SqliteGoalStore::open(&path).unwrap();
            store.create_goal(&goal, &steps(&goal)).await.unwrap();
            goal.status = GoalStatus::WaitingApproval;
            goal.approval_token = Some("tok".to_string());
            store.update_goal(&goal).await.unwrap();
        }

        let store = SqliteGoalStore::open(&path).unwrap();
        let loaded = store.get_goal(goal.goal_id).await.unwrap();
        assert_eq!(loaded, goal);
        let orders: Vec<u32> = store
            .list_steps(goal.goal_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.step_order)
            .collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_step_and_missing_records() {
        let store = SqliteGoalStore::open_in_memory().unwrap();
        let goal = goal();
        assert!(matches!(store.get_goal(goal.goal_id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.list_steps(goal.goal_id).await, Err(StoreError::NotFound(_))));

        store.create_goal(&goal, &steps(&goal)).await.unwrap();
        let mut step = store.list_steps(goal.goal_id).await.unwrap().remove(1);
        step.status = StepStatus::Blocked;
        step.requires_approval = true;
        store.update_step(&step).await.unwrap();
        let reloaded = store.list_steps(goal.goal_id).await.unwrap();
        assert_eq!(reloaded[1].status, StepStatus::Blocked);
        assert!(reloaded[1].requires_approval);
    }

    #[tokio::test]
    async fn test_duplicate_orders_rejected() {
        let store = SqliteGoalStore::open_in_memory().unwrap();
        let goal = goal();
        let mut plan = steps(&goal);
        plan[0].step_order = 1;
        assert!(matches!(
            store.create_goal(&goal, &plan).await,
            Err(StoreError::InvalidPlan(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_upsert() {
        let store = SqliteGoalStore::open_in_memory().unwrap();
        let mut profile = UserProfile::new("u1", "retail");
        store.upsert_profile(&profile).await.unwrap();
        profile.learn_from_text("detailed revenue");
        store.upsert_profile(&profile).await.unwrap();
        assert_eq!(store.get_profile("u1", "retail").await.unwrap(), Some(profile));
    }
}
