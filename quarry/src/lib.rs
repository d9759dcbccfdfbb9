// Quarry Library
// Goal planning and guarded NL-to-SQL execution for analytics agents

// Foundations
pub mod cache;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod types;

// Tenant context and policy
pub mod profile;
pub mod risk;
pub mod tenant;

// External collaborators
pub mod database;
pub mod llm;
pub mod retrieval;
pub mod storage;

// SQL safety and generation
pub mod sql_generation;
pub mod sql_guard;

// Planning and execution
pub mod engine;
pub mod planner;

// Re-export the main entry points
pub use crate::catalog::ToolName;
pub use crate::config::AgentConfig;
pub use crate::engine::{EngineDeps, EngineError, GoalEngine, RunOptions, RunReport};
pub use crate::planner::PlanBuilder;
pub use crate::sql_generation::{SqlGenerationResult, SqlGenerator};
pub use crate::sql_guard::{GuardError, SqlGuard};
pub use crate::tenant::{TenantContext, TenantRegistry};
pub use crate::types::{Goal, GoalStatus, PlanStep, StepStatus};
