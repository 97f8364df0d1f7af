//! Reasoning-model-powered planner
//!
//! Builds a prompt from the capability catalog, asks the model for a
//! structured capability selection, and validates every proposed step
//! against the registry before execution. Model output outside the
//! registry schema is dropped, never trusted.

use super::{fallback_plan, Planner};
use crate::cache::{self, CacheStore};
use crate::capability::CapabilityRegistry;
use crate::llm::{ChatMessage, LlmClient};
use crate::models::{Plan, PlanSource, PlanStep, QueryMode, Turn};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<CapabilityRegistry>,
    plan_cache: Arc<dyn CacheStore>,
    plan_ttl: Duration,
}

impl LlmPlanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<CapabilityRegistry>,
        plan_cache: Arc<dyn CacheStore>,
        plan_ttl: Duration,
    ) -> Self {
        Self {
            llm,
            registry,
            plan_cache,
            plan_ttl,
        }
    }

    fn build_messages(&self, query_text: &str, history: &[Turn]) -> Vec<ChatMessage> {
        let system_prompt = format!(
            r#"You are an AI financial assistant that routes queries to data capabilities.

Given the user's query and conversation history, select which capabilities
should be called to answer it.

Available capabilities:
{}

Routing rules:
- Stock prices, news, and insider activity need one step per ticker.
- Use "search" for real-time market information and anything time-sensitive.
- Use "deep_research" ONLY if the user explicitly asked for deep research.
- Extract ticker symbols from company names (e.g. Tesla -> TSLA, Ford -> F).
- Make no unnecessary calls.

Return ONLY valid JSON, no explanation text:

{{
  "steps": [
    {{ "capability": "stock_price", "params": {{ "ticker": "AAPL" }} }},
    {{ "capability": "search", "params": {{ "query": "..." }} }}
  ]
}}
"#,
            self.registry.describe_for_prompt()
        );

        let mut messages = vec![ChatMessage::system(system_prompt)];
        for turn in history {
            messages.push(ChatMessage::user(&turn.query));
            messages.push(ChatMessage::assistant(&turn.answer));
        }
        messages.push(ChatMessage::user(query_text));
        messages
    }

    /// Validate model-proposed steps against the registry. Unknown
    /// capability ids and schema-invalid params are dropped, never fatal.
    fn validate_steps(&self, raw_steps: Vec<PlanStep>) -> Vec<PlanStep> {
        let mut steps: Vec<PlanStep> = Vec::with_capacity(raw_steps.len());

        for step in raw_steps {
            let Some(capability) = self.registry.get(&step.capability) else {
                warn!(capability = %step.capability, "Dropping step: unknown capability");
                continue;
            };
            if let Err(e) = capability.input_schema().validate(&step.params) {
                warn!(capability = %step.capability, error = %e, "Dropping step: invalid params");
                continue;
            }
            if steps.contains(&step) {
                continue;
            }
            steps.push(step);
        }

        steps
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, query_text: &str, mode: QueryMode, history: &[Turn]) -> Result<Plan> {
        let cache_key = cache::plan_key(query_text, mode);

        // A plan-cache hit short-circuits the model call entirely.
        match self.plan_cache.get(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(plan) = serde_json::from_value::<Plan>(cached) {
                    debug!(key = %cache_key, "Plan cache hit");
                    return Ok(plan);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Plan cache unavailable, treating as miss"),
        }

        let messages = self.build_messages(query_text, history);

        let response = match self.llm.complete(&messages, 0.3, 1024).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Planner model unreachable, using fallback plan");
                return Ok(fallback_plan(query_text, mode));
            }
        };

        let mut steps = match parse_plan_response(&response) {
            Ok(raw_steps) => self.validate_steps(raw_steps),
            Err(e) => {
                warn!(error = %e, "Unusable planner response, using fallback plan");
                return Ok(fallback_plan(query_text, mode));
            }
        };

        // Degraded-but-never-empty: the user always gets a substantive answer.
        if steps.is_empty() {
            steps = fallback_plan(query_text, QueryMode::Sonar).steps;
        }

        // Deep-research mode unconditionally includes the deep research pass.
        if mode == QueryMode::DeepResearch
            && !steps.iter().any(|s| s.capability == "deep_research")
        {
            steps.push(PlanStep::new(
                "deep_research",
                serde_json::json!({ "query": query_text }),
            ));
        }

        let plan = Plan::new(steps, PlanSource::LlmPlanned);

        debug!(step_count = plan.steps.len(), "Plan created");

        if let Ok(value) = serde_json::to_value(&plan) {
            cache::put_quietly(self.plan_cache.as_ref(), &cache_key, value, self.plan_ttl).await;
        }

        Ok(plan)
    }
}

/// Extract the steps array from a model response that may wrap its JSON in
/// a markdown fence or surrounding prose.
fn parse_plan_response(response: &str) -> Result<Vec<PlanStep>> {
    let json = extract_json_object(response).ok_or_else(|| {
        crate::error::SearchError::Planning(format!("no JSON object in response: {}", response))
    })?;

    let steps_json = json
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| crate::error::SearchError::Planning("no steps array".to_string()))?;

    let mut steps = Vec::with_capacity(steps_json.len());
    for step_json in steps_json {
        let Some(capability) = step_json.get("capability").and_then(Value::as_str) else {
            continue;
        };
        let params = step_json
            .get("params")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        steps.push(PlanStep::new(capability, params));
    }

    Ok(steps)
}

fn extract_json_object(response: &str) -> Option<Value> {
    // Prefer a ```json fenced block.
    if let Some(start) = response.find("```json") {
        let after = &response[start + 7..];
        if let Some(end) = after.find("```") {
            if let Ok(parsed) = serde_json::from_str(after[..end].trim()) {
                return Some(parsed);
            }
        }
    }

    // Fall back to the outermost brace span.
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    serde_json::from_str(response[start..=end].trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::capability::MockCapability;
    use crate::llm::MockLlm;
    use serde_json::json;

    fn test_registry() -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        for id in ["search", "deep_research", "stock_price", "company_news"] {
            registry.register(Arc::new(MockCapability::new(id, json!({"ok": true}))));
        }
        Arc::new(registry)
    }

    fn planner_with(llm: Arc<MockLlm>) -> LlmPlanner {
        LlmPlanner::new(
            llm,
            test_registry(),
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_plan_from_model_response() {
        let llm = Arc::new(MockLlm::single(
            r#"```json
{"steps": [
  {"capability": "stock_price", "params": {"ticker": "TSLA"}},
  {"capability": "stock_price", "params": {"ticker": "F"}},
  {"capability": "search", "params": {"query": "compare TSLA and F"}}
]}
```"#,
        ));
        let planner = planner_with(llm);

        let plan = planner
            .plan("Compare Tesla and Ford", QueryMode::Sonar, &[])
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.source, PlanSource::LlmPlanned);
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_steps_dropped() {
        let llm = Arc::new(MockLlm::single(
            r#"{"steps": [
  {"capability": "made_up_capability", "params": {"query": "x"}},
  {"capability": "stock_price", "params": {"ticker": "NOT A TICKER"}},
  {"capability": "search", "params": {"query": "x"}}
]}"#,
        ));
        let planner = planner_with(llm);

        let plan = planner.plan("x", QueryMode::Sonar, &[]).await.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].capability, "search");
    }

    #[tokio::test]
    async fn test_empty_selection_falls_back_to_search() {
        let llm = Arc::new(MockLlm::single(r#"{"steps": []}"#));
        let planner = planner_with(llm);

        let plan = planner.plan("hello", QueryMode::Sonar, &[]).await.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].capability, "search");
    }

    #[tokio::test]
    async fn test_garbage_response_falls_back() {
        let llm = Arc::new(MockLlm::single("I cannot help with that."));
        let planner = planner_with(llm);

        let plan = planner.plan("hello", QueryMode::Sonar, &[]).await.unwrap();
        assert_eq!(plan.steps[0].capability, "search");
    }

    #[tokio::test]
    async fn test_model_unreachable_falls_back() {
        let llm = Arc::new(MockLlm::new(vec![]));
        let planner = planner_with(llm.clone());

        let plan = planner.plan("hello", QueryMode::Sonar, &[]).await.unwrap();
        assert_eq!(plan.steps[0].capability, "search");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_deep_research_mode_forces_step() {
        let llm = Arc::new(MockLlm::single(
            r#"{"steps": [{"capability": "search", "params": {"query": "x"}}]}"#,
        ));
        let planner = planner_with(llm);

        let plan = planner.plan("x", QueryMode::DeepResearch, &[]).await.unwrap();
        assert!(plan.steps.iter().any(|s| s.capability == "deep_research"));
    }

    #[tokio::test]
    async fn test_plan_cache_short_circuits_model() {
        let llm = Arc::new(MockLlm::single(
            r#"{"steps": [{"capability": "search", "params": {"query": "markets"}}]}"#,
        ));
        let planner = planner_with(llm.clone());

        let first = planner
            .plan("How are Markets doing", QueryMode::Sonar, &[])
            .await
            .unwrap();
        // Normalized-identical re-issue hits the plan cache.
        let second = planner
            .plan("how are  markets doing", QueryMode::Sonar, &[])
            .await
            .unwrap();

        assert_eq!(llm.call_count(), 1);
        assert_eq!(first.steps, second.steps);
    }

    #[test]
    fn test_extract_json_object_variants() {
        let fenced = "Sure!\n```json\n{\"steps\": []}\n```";
        assert!(extract_json_object(fenced).is_some());

        let bare = "here you go {\"steps\": [{\"capability\": \"search\"}]} done";
        assert!(extract_json_object(bare).is_some());

        assert!(extract_json_object("no json here").is_none());
    }
}
