#![allow(dead_code)]

use std::sync::Arc;

use quarry::database::SqliteExecutor;
use quarry::engine::EngineDeps;
use quarry::llm::ScriptedTextGenerator;
use quarry::retrieval::InMemoryRetriever;
use quarry::storage::{GoalStore, InMemoryGoalStore};
use quarry::tenant::TenantConfig;
use quarry::{AgentConfig, GoalEngine, TenantContext, TenantRegistry};

pub const RETAIL_TOML: &str = r#"
tenant_id = "retail"
name = "Retail demo"

[tables.sales_transactions]
description = "One row per sale"
primary_time_column = "sale_date"

[tables.sales_transactions.columns.dataset_id]
type = "text"
meaning = "Uploaded dataset"

[tables.sales_transactions.columns.sale_date]
type = "date"
meaning = "Day of the sale"

[tables.sales_transactions.columns.region]
type = "text"
meaning = "Sales region"

[tables.sales_transactions.columns.amount]
type = "numeric"
meaning = "Sale amount in USD"

[metrics.revenue]
description = "Sum of amount"
aggregation = "SUM(amount)"

[policy]
forbidden_topics = ["salary", "pii"]
"#;

pub const SALES_FIXTURE: &str = "
CREATE TABLE sales_transactions(dataset_id TEXT, sale_date TEXT, region TEXT, amount REAL);
INSERT INTO sales_transactions VALUES
    ('ds1', '2024-03-01', 'north', 10),
    ('ds1', '2024-03-02', 'south', 10),
    ('ds1', '2024-03-03', 'north', 10),
    ('ds1', '2024-03-04', 'south', 10),
    ('ds1', '2024-03-05', 'north', 100),
    ('ds2', '2024-03-01', 'north', 5000);
";

pub fn tenant() -> TenantContext {
    let config: TenantConfig = toml::from_str(RETAIL_TOML).unwrap();
    TenantContext::new(config, "dataset_id").unwrap()
}

pub fn sales_db() -> Arc<SqliteExecutor> {
    let db = SqliteExecutor::open_in_memory().unwrap();
    db.execute_batch(SALES_FIXTURE).unwrap();
    Arc::new(db)
}

/// Only SQL generation talks to the backend.
pub fn config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.planner.llm_enabled = false;
    config.execution.verifier_enabled = false;
    config
}

/// Scripted reply in the shape the SQL generator expects.
pub fn sql_reply(sql: &str) -> String {
    serde_json::json!({
        "sql": sql,
        "answer_type": "table",
        "summary": "scripted",
        "assumptions": [],
    })
    .to_string()
}

pub struct Harness {
    pub engine: GoalEngine,
    pub llm: Arc<ScriptedTextGenerator>,
    pub retriever: Arc<InMemoryRetriever>,
    pub store: Arc<dyn GoalStore>,
}

pub fn harness(responses: &[String]) -> Harness {
    harness_with(responses, config(), Arc::new(InMemoryGoalStore::new()))
}

pub fn harness_with(responses: &[String], config: AgentConfig, store: Arc<dyn GoalStore>) -> Harness {
    let tenants = Arc::new(TenantRegistry::new());
    let tenant = tenants.register(tenant()).unwrap();
    let retriever = Arc::new(InMemoryRetriever::new());
    retriever.index_tenant_schema(&tenant).unwrap();
    retriever
        .add_document("retail", None, "Revenue", "Revenue is the sum of sale amounts.")
        .unwrap();
    let llm = Arc::new(ScriptedTextGenerator::new("scripted").with_responses(responses.to_vec()));

    let engine = GoalEngine::new(
        EngineDeps {
            store: store.clone(),
            tenants,
            retriever: retriever.clone(),
            executor: sales_db(),
            llm: Some(llm.clone()),
        },
        config,
    );
    Harness {
        engine,
        llm,
        retriever,
        store,
    }
}
