use dashmap::DashMap;
use std::sync::Arc;

use crate::types::GoalId;

/// Per-goal advisory lock: at most one run of a goal at a time.
#[derive(Clone, Default)]
pub struct RunGuard {
    active: Arc<DashMap<GoalId, ()>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `goal_id`, or `None` when a run already holds it.
    pub fn try_acquire(&self, goal_id: GoalId) -> Option<RunLease> {
        use dashmap::mapref::entry::Entry;
        match self.active.entry(goal_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(RunLease {
                    goal_id,
                    active: self.active.clone(),
                })
            }
        }
    }

    pub fn is_running(&self, goal_id: GoalId) -> bool {
        self.active.contains_key(&goal_id)
    }
}

/// Releases the goal when dropped.
pub struct RunLease {
    goal_id: GoalId,
    active: Arc<DashMap<GoalId, ()>>,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.active.remove(&self.goal_id);
    }
}
