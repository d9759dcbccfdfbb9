//! Plan Builder: turns goal text into an ordered tool plan.
//!
//! The heuristic pipeline always works. When a text-generation backend is
//! configured it is asked for a `tool_name | title` plan first; tools outside
//! the catalog are discarded and an empty result falls back to the heuristic.

use std::sync::Arc;

use crate::catalog::ToolName;
use crate::config::PlannerConfig;
use crate::llm::{GenerationRequest, TextGenerator};
use crate::profile::UserProfile;

const DEFAULT_TITLE: &str = "Data analysis goal";
const TITLE_CHARS: usize = 80;
const ANOMALY_KEYWORDS: &[&str] = &["anomaly", "drop", "spike", "sudden", "outlier"];

const HEURISTIC_PIPELINE: [(ToolName, &str); 7] = [
    (ToolName::SchemaRetrieval, "Find relevant schema context"),
    (ToolName::KbRetrieval, "Find business definitions"),
    (ToolName::ExampleRetrieval, "Find similar solved questions"),
    (ToolName::SqlGeneration, "Generate SQL"),
    (ToolName::SqlVerifier, "Verify SQL"),
    (ToolName::SqlExecution, "Execute SQL"),
    (ToolName::SummaryWriter, "Write final answer"),
];

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning agent for analytics tasks. \
Return only newline-separated steps in the format: tool_name | title.";

/// Planned goal, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalPlan {
    pub title: String,
    pub steps: Vec<(ToolName, String)>,
}

pub struct PlanBuilder {
    llm: Option<Arc<dyn TextGenerator>>,
    config: PlannerConfig,
}

impl PlanBuilder {
    pub fn new(llm: Option<Arc<dyn TextGenerator>>, config: PlannerConfig) -> Self {
        Self { llm, config }
    }

    /// Heuristic-only builder.
    pub fn heuristic() -> Self {
        Self::new(
            None,
            PlannerConfig {
                llm_enabled: false,
                ..PlannerConfig::default()
            },
        )
    }

    pub async fn build(&self, goal_text: &str, profile: Option<&UserProfile>) -> GoalPlan {
        let title = plan_title(goal_text);
        let mut steps = match self.llm_plan(goal_text, profile).await {
            Some(steps) => steps,
            None => heuristic_plan(goal_text),
        };
        steps.truncate(self.config.max_plan_steps);
        tracing::info!(steps = steps.len(), title = %title, "plan built");
        GoalPlan { title, steps }
    }

    async fn llm_plan(
        &self,
        goal_text: &str,
        profile: Option<&UserProfile>,
    ) -> Option<Vec<(ToolName, String)>> {
        if !self.config.llm_enabled {
            return None;
        }
        let llm = self.llm.as_ref()?;
        let request = planning_request(goal_text, profile);
        let text = match llm.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "LLM planning unavailable, using heuristic plan");
                return None;
            }
        };
        let steps = parse_plan_lines(&text);
        if steps.is_empty() {
            tracing::warn!("LLM plan had no usable steps, using heuristic plan");
            None
        } else {
            Some(steps)
        }
    }
}

/// First 80 characters of the trimmed goal text, or a default.
pub fn plan_title(goal_text: &str) -> String {
    let trimmed = goal_text.trim();
    if trimmed.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        trimmed.chars().take(TITLE_CHARS).collect()
    }
}

/// Fixed seven-step pipeline, with an anomaly scan before the summary when the
/// goal talks about anomalies.
pub fn heuristic_plan(goal_text: &str) -> Vec<(ToolName, String)> {
    let mut steps: Vec<(ToolName, String)> = HEURISTIC_PIPELINE
        .iter()
        .map(|(tool, title)| (*tool, title.to_string()))
        .collect();
    let lower = goal_text.to_lowercase();
    if ANOMALY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        let at = steps.len() - 1;
        steps.insert(at, (ToolName::AnomalyScan, "Check anomalies".to_string()));
    }
    steps
}

/// Parse `tool_name | title` lines. Lines without `|` and unknown tools are skipped.
pub fn parse_plan_lines(text: &str) -> Vec<(ToolName, String)> {
    text.lines()
        .filter_map(|line| {
            let (tool, title) = line.split_once('|')?;
            let tool = tool.trim().trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.');
            let tool: ToolName = tool.trim().to_lowercase().parse().ok()?;
            let title = title.trim();
            let title = if title.is_empty() {
                tool.description().to_string()
            } else {
                title.to_string()
            };
            Some((tool, title))
        })
        .collect()
}

fn planning_request(goal_text: &str, profile: Option<&UserProfile>) -> GenerationRequest {
    let tools: Vec<String> = ToolName::ALL
        .iter()
        .map(|t| format!("- {}: {}", t, t.description()))
        .collect();
    let mut user = format!(
        "Goal:\n{}\n\nAvailable tools:\n{}\n",
        goal_text.trim(),
        tools.join("\n")
    );
    if let Some(profile) = profile {
        user.push_str(&format!(
            "\nUser preferences: style={}, preferred KPIs={}\n",
            profile.response_style.as_str(),
            if profile.preferred_kpis.is_empty() {
                "none".to_string()
            } else {
                profile.preferred_kpis.join(", ")
            }
        ));
    }
    user.push_str("\nReturn at most 10 steps.");
    GenerationRequest::new(PLANNER_SYSTEM_PROMPT, user)
        .with_temperature(0.0)
        .with_max_tokens(300)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedTextGenerator;

    fn tools(plan: &GoalPlan) -> Vec<ToolName> {
        plan.steps.iter().map(|(tool, _)| *tool).collect()
    }

    #[tokio::test]
    async fn test_heuristic_plan_without_anomaly_keywords() {
        let plan = PlanBuilder::heuristic().build("revenue last 7 days", None).await;
        assert_eq!(plan.title, "revenue last 7 days");
        assert_eq!(
            tools(&plan),
            vec![
                ToolName::SchemaRetrieval,
                ToolName::KbRetrieval,
                ToolName::ExampleRetrieval,
                ToolName::SqlGeneration,
                ToolName::SqlVerifier,
                ToolName::SqlExecution,
                ToolName::SummaryWriter,
            ]
        );
    }

    #[tokio::test]
    async fn test_anomaly_step_before_summary() {
        let plan = PlanBuilder::heuristic()
            .build("Why did revenue DROP last week?", None)
            .await;
        let tools = tools(&plan);
        assert_eq!(tools.len(), 8);
        assert_eq!(tools[6], ToolName::AnomalyScan);
        assert_eq!(tools[7], ToolName::SummaryWriter);
    }

    #[test]
    fn test_title_rules() {
        assert_eq!(plan_title("   "), "Data analysis goal");
        let long = "x".repeat(120);
        assert_eq!(plan_title(&long).len(), 80);
    }

    #[tokio::test]
    async fn test_llm_plan_filters_unknown_tools() {
        let llm = Arc::new(ScriptedTextGenerator::new("planner").with_responses([
            "1. schema_retrieval | Look up tables\nshell_exec | rm -rf\nnot a plan line\nsql_generation |\nsummary_writer | Answer",
        ]));
        let builder = PlanBuilder::new(Some(llm.clone()), PlannerConfig::default());
        let plan = builder.build("revenue by region", None).await;
        assert_eq!(
            plan.steps,
            vec![
                (ToolName::SchemaRetrieval, "Look up tables".to_string()),
                (
                    ToolName::SqlGeneration,
                    ToolName::SqlGeneration.description().to_string()
                ),
                (ToolName::SummaryWriter, "Answer".to_string()),
            ]
        );
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_llm_plan_falls_back_and_caps() {
        let llm = Arc::new(ScriptedTextGenerator::new("planner").with_responses(["nothing useful"]));
        let builder = PlanBuilder::new(Some(llm), PlannerConfig::default());
        let plan = builder.build("revenue by region", None).await;
        assert_eq!(plan.steps.len(), 7);

        let many = "kb_retrieval | again\n".repeat(15);
        let llm = Arc::new(ScriptedTextGenerator::new("planner").with_responses([many]));
        let builder = PlanBuilder::new(Some(llm), PlannerConfig::default());
        assert_eq!(builder.build("revenue by region", None).await.steps.len(), 10);
    }

    #[tokio::test]
    async fn test_profile_reaches_prompt() {
        let llm = Arc::new(ScriptedTextGenerator::new("planner"));
        let mut profile = UserProfile::new("u1", "retail");
        profile.learn_from_text("detailed margin review");
        let builder = PlanBuilder::new(Some(llm.clone()), PlannerConfig::default());
        let plan = builder.build("margin by store", Some(&profile)).await;
        assert_eq!(plan.steps.len(), 7);
        let prompt = &llm.requests()[0].user_prompt;
        assert!(prompt.contains("style=detailed, preferred KPIs=margin"));
    }
}
