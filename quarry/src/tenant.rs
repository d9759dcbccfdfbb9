//! Tenant schema and policy.
//!
//! A `TenantConfig` is what operators write (TOML or YAML). It is compiled
//! once into an immutable `TenantContext`, which every pipeline call receives
//! explicitly; there is no process-wide "active tenant".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::cache::stable_hash;
use crate::config::ConfigError;
use crate::sql_guard::SqlGuard;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Invalid tenant configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Tenant registry lock poisoned")]
    LockPoisoned,
}

/// Question rejected by tenant policy. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Question contains forbidden topic: {0}")]
    ForbiddenTopic(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    #[serde(rename = "type", default = "default_column_type")]
    pub column_type: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_column_type() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TableDefinition {
    #[serde(default)]
    pub description: String,
    pub columns: BTreeMap<String, ColumnDefinition>,
    #[serde(default)]
    pub primary_time_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipDefinition {
    pub name: String,
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(default = "default_relationship")]
    pub relationship_type: String,
    #[serde(default)]
    pub description: String,
}

fn default_relationship() -> String {
    "many_to_one".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDefinition {
    pub description: String,
    #[serde(default)]
    pub aggregation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub forbidden_topics: Vec<String>,
    pub max_date_range_days: Option<u32>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            forbidden_topics: vec!["pii".to_string(), "personal_data".to_string()],
            max_date_range_days: None,
        }
    }
}

/// Operator-facing tenant definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantConfig {
    pub tenant_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub tables: BTreeMap<String, TableDefinition>,
    /// Views that may be queried like tables.
    #[serde(default)]
    pub views: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDefinition>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricDefinition>,
    /// Overrides the per-table time columns.
    #[serde(default)]
    pub primary_time_column: Option<String>,
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl TenantConfig {
    /// Load from `.toml`, `.yaml` or `.yml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Structural checks; every problem is collected before failing.
    pub fn validate(&self) -> Result<(), TenantError> {
        let mut errors = Vec::new();
        if self.tenant_id.trim().is_empty() {
            errors.push("tenant_id must not be empty".to_string());
        }
        if self.tables.is_empty() {
            errors.push("at least one table must be defined".to_string());
        }
        for (name, table) in &self.tables {
            if table.columns.is_empty() {
                errors.push(format!("table '{}' must define at least one column", name));
            }
            if let Some(time_col) = &table.primary_time_column {
                if !table.columns.contains_key(time_col) {
                    errors.push(format!(
                        "table '{}': primary_time_column '{}' is not a column",
                        name, time_col
                    ));
                }
            }
        }
        for rel in &self.relationships {
            for (table, column) in [(&rel.from_table, &rel.from_column), (&rel.to_table, &rel.to_column)] {
                match self.tables.get(table) {
                    None => errors.push(format!("relationship '{}': unknown table '{}'", rel.name, table)),
                    Some(def) if !def.columns.contains_key(column) => errors.push(format!(
                        "relationship '{}': unknown column '{}.{}'",
                        rel.name, table, column
                    )),
                    Some(_) => {}
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TenantError::Invalid(errors))
        }
    }

    fn schema_description(&self) -> String {
        let mut out = format!("# {} Schema\n\n", self.tenant_id.to_uppercase());
        for (name, table) in &self.tables {
            out.push_str(&format!("## Table: `{}`\n", name));
            if !table.description.is_empty() {
                out.push_str(&format!("{}\n\n", table.description));
            }
            out.push_str("### Columns:\n");
            for (col_name, col) in &table.columns {
                out.push_str(&format!("- `{}` ({}): {}\n", col_name, col.column_type, col.meaning));
            }
            if let Some(time_col) = &table.primary_time_column {
                out.push_str(&format!("\n**Primary Time Column**: `{}`\n", time_col));
            }
            out.push('\n');
        }
        if !self.relationships.is_empty() {
            out.push_str("# Table Relationships (use JOINs when the question spans multiple tables)\n\n");
            for rel in &self.relationships {
                out.push_str(&format!(
                    "- `{}`.`{}` -> `{}`.`{}` ({}): {}\n",
                    rel.from_table, rel.from_column, rel.to_table, rel.to_column, rel.relationship_type, rel.description
                ));
            }
        }
        out
    }

    fn metrics_description(&self) -> String {
        if self.metrics.is_empty() {
            return String::new();
        }
        let mut out = String::from("# Available Metrics\n\n");
        for (name, metric) in &self.metrics {
            out.push_str(&format!("- `{}`: {}\n", name, metric.description));
            if let Some(agg) = &metric.aggregation {
                out.push_str(&format!("  (Aggregation: {})\n", agg));
            }
        }
        out
    }
}

/// Compiled, immutable view of one tenant.
#[derive(Debug, Clone)]
pub struct TenantContext {
    config: TenantConfig,
    scope_param: String,
    guard: SqlGuard,
    schema_description: String,
    metrics_description: String,
    fingerprint: String,
}

impl TenantContext {
    /// Validate `config` and build the allowlist. The scoping parameter is
    /// always an allowed column.
    pub fn new(config: TenantConfig, scope_param: impl Into<String>) -> Result<Self, TenantError> {
        config.validate()?;
        let scope_param = scope_param.into();

        let tables = config.tables.keys().chain(config.views.iter());
        let columns = config
            .tables
            .values()
            .flat_map(|t| t.columns.keys())
            .chain(std::iter::once(&scope_param));
        let guard = SqlGuard::new(tables, columns);

        let fingerprint = stable_hash(&config);
        let schema_description = config.schema_description();
        let metrics_description = config.metrics_description();
        tracing::info!(
            tenant = %config.tenant_id,
            tables = config.tables.len(),
            fingerprint = %&fingerprint[..8],
            "tenant context compiled"
        );

        Ok(Self {
            config,
            scope_param,
            guard,
            schema_description,
            metrics_description,
            fingerprint,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.config.tenant_id
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn guard(&self) -> &SqlGuard {
        &self.guard
    }

    pub fn scope_param(&self) -> &str {
        &self.scope_param
    }

    pub fn primary_time_column(&self) -> Option<&str> {
        self.config.primary_time_column.as_deref().or_else(|| {
            self.config
                .tables
                .values()
                .find_map(|t| t.primary_time_column.as_deref())
        })
    }

    pub fn max_date_range_days(&self) -> Option<u32> {
        self.config.policy.max_date_range_days
    }

    pub fn schema_description(&self) -> &str {
        &self.schema_description
    }

    pub fn metrics_description(&self) -> &str {
        &self.metrics_description
    }

    /// Hash of the whole configuration; part of every SQL cache key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Case-insensitive substring match against the forbidden topics.
    pub fn validate_question(&self, question: &str) -> Result<(), PolicyError> {
        let lower = question.to_lowercase();
        match self
            .config
            .policy
            .forbidden_topics
            .iter()
            .find(|topic| !topic.is_empty() && lower.contains(&topic.to_lowercase()))
        {
            Some(topic) => {
                tracing::warn!(tenant = %self.tenant_id(), topic = %topic, "question rejected by policy");
                Err(PolicyError::ForbiddenTopic(topic.clone()))
            }
            None => Ok(()),
        }
    }

    /// One `(title, snippet)` per table, for prompts when retrieval finds nothing.
    pub fn table_snippets(&self) -> Vec<(String, String)> {
        self.config
            .tables
            .iter()
            .map(|(name, table)| {
                let columns: Vec<&str> = table.columns.keys().map(String::as_str).collect();
                let mut snippet = format!("Columns: {}", columns.join(", "));
                if !table.description.is_empty() {
                    snippet = format!("{}. {}", table.description, snippet);
                }
                (format!("Table {}", name), snippet)
            })
            .collect()
    }
}

/// Tenants known to this process, looked up by id.
#[derive(Default)]
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, Arc<TenantContext>>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context: TenantContext) -> Result<Arc<TenantContext>, TenantError> {
        let context = Arc::new(context);
        let mut tenants = self.tenants.write().map_err(|_| TenantError::LockPoisoned)?;
        tenants.insert(context.tenant_id().to_string(), context.clone());
        Ok(context)
    }

    /// Load, compile and register a tenant file.
    pub fn load_file(
        &self,
        path: impl AsRef<Path>,
        scope_param: &str,
    ) -> Result<Arc<TenantContext>, TenantError> {
        let config = TenantConfig::from_file(path)?;
        self.register(TenantContext::new(config, scope_param)?)
    }

    pub fn get(&self, tenant_id: &str) -> Result<Arc<TenantContext>, TenantError> {
        let tenants = self.tenants.read().map_err(|_| TenantError::LockPoisoned)?;
        tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| TenantError::UnknownTenant(tenant_id.to_string()))
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tenants
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}
