//! Planner trait and implementations
//!
//! When the fast path misses, the planner decides which capabilities to
//! call for a query, either via the reasoning model or a scripted mock.

use crate::models::{Plan, PlanSource, PlanStep, QueryMode, Turn};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;

pub mod llm;
pub use llm::LlmPlanner;

/// Trait for plan generation.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Choose capabilities and parameters for a query. Never fails the
    /// query outright: unusable model output degrades to a default plan.
    async fn plan(&self, query_text: &str, mode: QueryMode, history: &[Turn]) -> Result<Plan>;
}

/// The guaranteed-substantive fallback: one real-time search step, plus
/// deep research when the user explicitly asked for that mode.
pub fn fallback_plan(query_text: &str, mode: QueryMode) -> Plan {
    let mut steps = vec![PlanStep::new("search", json!({ "query": query_text }))];
    if mode == QueryMode::DeepResearch {
        steps.push(PlanStep::new("deep_research", json!({ "query": query_text })));
    }
    Plan::new(steps, PlanSource::LlmPlanned)
}

/// Mock planner for development & testing.
/// Keeps the pipeline functional without a reasoning-model dependency.
pub struct MockPlanner;

#[async_trait]
impl Planner for MockPlanner {
    async fn plan(&self, query_text: &str, mode: QueryMode, _history: &[Turn]) -> Result<Plan> {
        Ok(fallback_plan(query_text, mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_planner_default_plan() {
        let plan = MockPlanner
            .plan("how are markets doing", QueryMode::Sonar, &[])
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].capability, "search");
        assert_eq!(plan.source, PlanSource::LlmPlanned);
    }

    #[tokio::test]
    async fn test_deep_research_mode_adds_step() {
        let plan = MockPlanner
            .plan("analyze NVDA vs AMD", QueryMode::DeepResearch, &[])
            .await
            .unwrap();
        assert!(plan
            .steps
            .iter()
            .any(|s| s.capability == "deep_research"));
    }
}
