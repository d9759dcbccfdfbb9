//! Runtime configuration for the agent.
//!
//! Configuration is read from a TOML file and can be overlaid with `QUARRY_*`
//! environment variables. Every section has defaults, so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// SQL generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Generation attempts including the first one
    pub max_attempts: u32,
    /// LIMIT appended to candidates that have none
    pub default_limit: u32,
    /// Bumping this invalidates cached SQL
    pub prompt_version: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timezone: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            default_limit: 200,
            prompt_version: "v2".to_string(),
            temperature: 0.0,
            max_tokens: 500,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for generated SQL (6h)
    pub sql_ttl_secs: u64,
    /// TTL for query results (2m)
    pub result_ttl_secs: u64,
    /// Per-cache capacity; the least recently used entry is evicted past it
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sql_ttl_secs: 21_600,
            result_ttl_secs: 120,
            max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Ask the text-generation backend for a plan before using the heuristic one
    pub llm_enabled: bool,
    pub max_plan_steps: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            llm_enabled: true,
            max_plan_steps: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Step budget used when a run does not specify one
    pub default_max_steps: u32,
    pub statement_timeout_ms: u64,
    pub max_result_rows: usize,
    /// Name of the dataset scoping parameter
    pub scope_param: String,
    pub verifier_enabled: bool,
    /// Use the text-generation backend for summaries
    pub narrative_summaries: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_max_steps: 20,
            statement_timeout_ms: 15_000,
            max_result_rows: 300,
            scope_param: "dataset_id".to_string(),
            verifier_enabled: true,
            narrative_summaries: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub planner: PlannerConfig,
    pub execution: ExecutionConfig,
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AgentConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `QUARRY_*` environment variables onto this configuration.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QUARRY_CACHE_ENABLED") {
            self.cache.enabled = parse_flag("QUARRY_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("QUARRY_SQL_CACHE_TTL_SECS") {
            self.cache.sql_ttl_secs = parse_number("QUARRY_SQL_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("QUARRY_RESULT_CACHE_TTL_SECS") {
            self.cache.result_ttl_secs = parse_number("QUARRY_RESULT_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("QUARRY_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_number("QUARRY_CACHE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = lookup("QUARRY_LLM_PLANNER_ENABLED") {
            self.planner.llm_enabled = parse_flag("QUARRY_LLM_PLANNER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("QUARRY_SQL_VERIFIER_ENABLED") {
            self.execution.verifier_enabled = parse_flag("QUARRY_SQL_VERIFIER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("QUARRY_MAX_STEPS") {
            self.execution.default_max_steps = parse_number("QUARRY_MAX_STEPS", &v)?;
        }
        if let Some(v) = lookup("QUARRY_STATEMENT_TIMEOUT_MS") {
            self.execution.statement_timeout_ms = parse_number("QUARRY_STATEMENT_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [cache]
            sql_ttl_secs = 60

            [execution]
            verifier_enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.sql_ttl_secs, 60);
        assert!(config.cache.enabled);
        assert!(!config.execution.verifier_enabled);
        assert_eq!(config.generation.max_attempts, 2);
        assert_eq!(config.execution.scope_param, "dataset_id");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("QUARRY_CACHE_ENABLED", "false"),
            ("QUARRY_MAX_STEPS", "3"),
            ("QUARRY_CACHE_MAX_ENTRIES", "50"),
        ]
        .into_iter()
        .collect();
        let mut config = AgentConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.execution.default_max_steps, 3);
        assert_eq!(config.cache.max_entries, 50);
    }

    #[test]
    fn test_invalid_env_value_is_reported() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_overrides(|k| (k == "QUARRY_STATEMENT_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
