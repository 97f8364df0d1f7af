//! Capability trait and registry
//!
//! A capability is an abstract external data-fetching operation (price
//! lookup, news search, deep research) with a declared input schema and a
//! cost class. The registry is built at process start and is read-only
//! afterwards; capabilities are looked up by identifier only.

use crate::error::SearchError;
use crate::models::CostClass;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod providers;
pub use providers::create_default_registry;

//
// ================= Input Schema =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Free text, any non-empty string.
    Text,
    /// Stock ticker symbol: 1-5 ASCII letters.
    Ticker,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

/// Declared input schema of a capability.
#[derive(Debug, Clone, Copy)]
pub struct InputSchema {
    pub required: &'static [ParamSpec],
    pub optional: &'static [ParamSpec],
}

pub fn is_valid_ticker(symbol: &str) -> bool {
    !symbol.is_empty() && symbol.len() <= 5 && symbol.chars().all(|c| c.is_ascii_alphabetic())
}

impl InputSchema {
    /// Validate planner-supplied parameters against the declared schema.
    /// Model output outside the schema is discarded, not trusted.
    pub fn validate(&self, params: &Value) -> Result<()> {
        let obj = params.as_object().ok_or_else(|| {
            SearchError::InvalidCapabilityInput("params must be a JSON object".to_string())
        })?;

        for spec in self.required {
            let value = obj.get(spec.name).ok_or_else(|| {
                SearchError::InvalidCapabilityInput(format!("missing required '{}'", spec.name))
            })?;
            check_param(spec, value)?;
        }

        for spec in self.optional {
            if let Some(value) = obj.get(spec.name) {
                check_param(spec, value)?;
            }
        }

        Ok(())
    }

    /// One-line summary used in the planner prompt.
    pub fn describe(&self) -> String {
        let fmt = |spec: &ParamSpec| {
            let kind = match spec.kind {
                ParamKind::Text => "text",
                ParamKind::Ticker => "ticker",
            };
            format!("\"{}\": <{}>", spec.name, kind)
        };

        let mut parts: Vec<String> = self.required.iter().map(fmt).collect();
        parts.extend(self.optional.iter().map(|s| format!("{}?", fmt(s))));
        format!("{{ {} }}", parts.join(", "))
    }
}

fn check_param(spec: &ParamSpec, value: &Value) -> Result<()> {
    let text = value.as_str().ok_or_else(|| {
        SearchError::InvalidCapabilityInput(format!("'{}' must be a string", spec.name))
    })?;

    match spec.kind {
        ParamKind::Text if text.trim().is_empty() => Err(SearchError::InvalidCapabilityInput(
            format!("'{}' must not be empty", spec.name),
        )),
        ParamKind::Ticker if !is_valid_ticker(text) => Err(SearchError::InvalidCapabilityInput(
            format!("'{}' is not a valid ticker: {}", spec.name, text),
        )),
        _ => Ok(()),
    }
}

//
// ================= Capability Trait =================
//

/// A single external data capability.
///
/// Wire format, endpoints, and auth are the implementation's concern; the
/// core depends only on this contract.
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    fn id(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn cost_class(&self) -> CostClass;
    fn input_schema(&self) -> InputSchema;
    async fn call(&self, params: &Value) -> Result<Value>;
}

//
// ================= Registry =================
//

/// Static catalog of callable capabilities, built at process start.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities
            .insert(capability.id().to_string(), capability);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.capabilities.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Capability catalog rendered for the planner prompt.
    pub fn describe_for_prompt(&self) -> String {
        let mut ids: Vec<&String> = self.capabilities.keys().collect();
        ids.sort();

        ids.iter()
            .filter_map(|id| self.capabilities.get(*id))
            .map(|c| {
                let cost = match c.cost_class() {
                    CostClass::Cheap => "cheap",
                    CostClass::Expensive => "expensive",
                };
                format!(
                    "- {} ({}): {}; params: {}",
                    c.id(),
                    cost,
                    c.description(),
                    c.input_schema().describe()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Mock Capability =================
//

/// Scripted capability for development & testing.
/// Keeps the pipeline functional without provider credentials.
pub struct MockCapability {
    id: &'static str,
    cost_class: CostClass,
    schema: InputSchema,
    payload: Result<Value>,
    delay: std::time::Duration,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockCapability {
    pub fn new(id: &'static str, payload: Value) -> Self {
        Self {
            id,
            cost_class: CostClass::Cheap,
            schema: InputSchema {
                required: &[],
                optional: &[
                    ParamSpec {
                        name: "query",
                        kind: ParamKind::Text,
                    },
                    ParamSpec {
                        name: "ticker",
                        kind: ParamKind::Ticker,
                    },
                ],
            },
            payload: Ok(payload),
            delay: std::time::Duration::ZERO,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing(id: &'static str, message: impl Into<String>) -> Self {
        let mut mock = Self::new(id, Value::Null);
        mock.payload = Err(SearchError::Capability {
            capability: id.to_string(),
            message: message.into(),
        });
        mock
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost_class(mut self, cost_class: CostClass) -> Self {
        self.cost_class = cost_class;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Capability for MockCapability {
    fn id(&self) -> &'static str {
        self.id
    }

    fn description(&self) -> &'static str {
        "Scripted capability returning a fixed payload"
    }

    fn cost_class(&self) -> CostClass {
        self.cost_class
    }

    fn input_schema(&self) -> InputSchema {
        self.schema
    }

    async fn call(&self, _params: &Value) -> Result<Value> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.payload {
            Ok(value) => Ok(value.clone()),
            Err(SearchError::Capability {
                capability,
                message,
            }) => Err(SearchError::Capability {
                capability: capability.clone(),
                message: message.clone(),
            }),
            Err(_) => Err(SearchError::Capability {
                capability: self.id.to_string(),
                message: "scripted failure".to_string(),
            }),
        }
    }
}
