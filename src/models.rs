//! Core data models for the financial search orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

//
// ================= Enums =================
//

/// How the query should be answered.
///
/// `Sonar` is the standard fast/guided pipeline; `DeepResearch` skips the
/// fast-path classifier and always includes the deep research capability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Sonar,
    DeepResearch,
}

impl Default for QueryMode {
    fn default() -> Self {
        QueryMode::Sonar
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryMode::Sonar => "sonar",
            QueryMode::DeepResearch => "deep_research",
        };
        write!(f, "{}", s)
    }
}

/// Cost class of a capability, used for timeout and cache TTL selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CostClass {
    Cheap,
    Expensive,
}

/// Provenance of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    FastPath,
    LlmPlanned,
}

//
// ================= Query =================
//

/// An incoming query. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub mode: QueryMode,
    pub session_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            text: text.into(),
            mode,
            session_id: None,
        }
    }
}

//
// ================= Plan =================
//

/// One capability call within a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub capability: String,
    pub params: Value,
}

impl PlanStep {
    pub fn new(capability: impl Into<String>, params: Value) -> Self {
        Self {
            capability: capability.into(),
            params,
        }
    }
}

/// The resolved set of capability calls chosen for a query.
///
/// Created once per query, consumed by the coordinator, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub source: PlanSource,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>, source: PlanSource) -> Self {
        Self {
            steps,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

//
// ================= Capability Results =================
//

/// Outcome of one dispatched capability call. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub capability: String,
    pub params: Value,
    pub payload: Value,
    pub success: bool,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl CapabilityResult {
    pub fn success(capability: &str, params: Value, payload: Value, elapsed_ms: u64) -> Self {
        Self {
            capability: capability.to_string(),
            params,
            payload,
            success: true,
            error: None,
            fetched_at: Utc::now(),
            elapsed_ms,
        }
    }

    pub fn failure(capability: &str, params: Value, message: String, elapsed_ms: u64) -> Self {
        Self {
            capability: capability.to_string(),
            params,
            payload: Value::Null,
            success: false,
            error: Some(message),
            fetched_at: Utc::now(),
            elapsed_ms,
        }
    }
}

//
// ================= Sources =================
//

/// A cited source extracted from a capability payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub title: Option<String>,
    pub url: Option<String>,
}

//
// ================= Sessions =================
//

/// One completed (query, answer) turn within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub query: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }
}

//
// ================= Streaming =================
//

/// A single event on the streamed response channel.
///
/// Protocol: zero or more `status` events, then exactly one terminal
/// `result` or `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Status {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Result {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sources: Vec<Source>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Error {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl StreamEvent {
    pub fn status(content: impl Into<String>, session_id: Option<&str>) -> Self {
        StreamEvent::Status {
            content: content.into(),
            session_id: session_id.map(|s| s.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Result { .. } | StreamEvent::Error { .. })
    }
}

//
// ================= Cached Answers =================
//

/// A fully synthesized answer stored in the answer cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
}

//
// ================= Final Outcome =================
//

/// The non-streaming result of a completed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub answer: String,
    pub sources: Vec<Source>,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_wire_format() {
        let event = StreamEvent::status("Gathering financial data...", Some("abc"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["content"], "Gathering financial data...");
        assert_eq!(json["session_id"], "abc");

        let event = StreamEvent::Result {
            content: "AAPL closed at $210".to_string(),
            sources: vec![],
            session_id: Some("abc".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "result");
        // Empty source lists are omitted from the wire form.
        assert!(json.get("sources").is_none());
    }

    #[test]
    fn test_query_mode_wire_values() {
        assert_eq!(
            serde_json::to_value(QueryMode::DeepResearch).unwrap(),
            serde_json::json!("deep_research")
        );
        assert_eq!(
            serde_json::from_value::<QueryMode>(serde_json::json!("sonar")).unwrap(),
            QueryMode::Sonar
        );
    }

    #[test]
    fn test_capability_result_constructors() {
        let ok = CapabilityResult::success(
            "stock_price",
            serde_json::json!({"ticker": "AAPL"}),
            serde_json::json!({"results": []}),
            42,
        );
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = CapabilityResult::failure(
            "stock_price",
            serde_json::json!({"ticker": "AAPL"}),
            "timed out".to_string(),
            30_000,
        );
        assert!(!failed.success);
        assert_eq!(failed.payload, serde_json::Value::Null);
    }
}
