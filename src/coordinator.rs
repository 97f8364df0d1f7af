//! Execution coordinator
//!
//! Fans a plan's capability calls out concurrently, each under a bounded
//! timeout, and joins them all before synthesis. One failed call never
//! cancels its siblings; only a plan where every call failed is terminal.

use crate::cache::{self, CacheStore};
use crate::capability::CapabilityRegistry;
use crate::config::TtlPolicy;
use crate::error::SearchError;
use crate::models::{CapabilityResult, CostClass, Plan, PlanStep, StreamEvent};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct ExecutionCoordinator {
    registry: Arc<CapabilityRegistry>,
    result_cache: Arc<dyn CacheStore>,
    ttl: TtlPolicy,
    cheap_timeout: Duration,
    expensive_timeout: Duration,
}

impl ExecutionCoordinator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        result_cache: Arc<dyn CacheStore>,
        ttl: TtlPolicy,
        cheap_timeout: Duration,
        expensive_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            result_cache,
            ttl,
            cheap_timeout,
            expensive_timeout,
        }
    }

    /// Run every step of the plan concurrently and return one
    /// `CapabilityResult` per step, in initiation order.
    ///
    /// Pre-dispatch status events follow initiation order; completion
    /// statuses are emitted as calls finish, so a slow call never delays a
    /// faster sibling's report. A closed event channel cancels the whole
    /// fan-out and aborts any call still pending.
    pub async fn execute(
        &self,
        plan: &Plan,
        session_id: Option<&str>,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<Vec<CapabilityResult>> {
        if plan.is_empty() {
            return Err(SearchError::InvalidPlan("plan has no steps".to_string()));
        }

        let step_count = plan.steps.len();
        let mut slots: Vec<Option<CapabilityResult>> = Vec::with_capacity(step_count);
        slots.resize_with(step_count, || None);
        let mut handles = Vec::new();

        debug!(step_count, source = ?plan.source, "Starting plan execution");

        for (idx, step) in plan.steps.iter().enumerate() {
            if let Some(tx) = events {
                let _ = tx
                    .send(StreamEvent::status(dispatch_message(step), session_id))
                    .await;
            }

            let Some(capability) = self.registry.get(&step.capability) else {
                warn!(capability = %step.capability, "Step references unregistered capability");
                slots[idx] = Some(CapabilityResult::failure(
                    &step.capability,
                    step.params.clone(),
                    "capability not registered".to_string(),
                    0,
                ));
                continue;
            };

            let cache_key = cache::result_key(&step.capability, &step.params);
            match self.result_cache.get(&cache_key).await {
                Ok(Some(payload)) => {
                    debug!(capability = %step.capability, "Result cache hit");
                    slots[idx] = Some(CapabilityResult::success(
                        &step.capability,
                        step.params.clone(),
                        payload,
                        0,
                    ));
                    if let Some(tx) = events {
                        let _ = tx
                            .send(StreamEvent::status(
                                completion_message(&step.capability, true),
                                session_id,
                            ))
                            .await;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Result cache unavailable, treating as miss"),
            }

            let (timeout, result_ttl) = match capability.cost_class() {
                CostClass::Cheap => (self.cheap_timeout, self.ttl.cheap_result),
                CostClass::Expensive => (self.expensive_timeout, self.ttl.expensive_result),
            };

            let result_cache = self.result_cache.clone();
            let params = step.params.clone();
            let capability_id = step.capability.clone();
            let completion_tx = events.cloned();
            let completion_sid = session_id.map(String::from);

            handles.push((
                idx,
                tokio::spawn(async move {
                    let start = Instant::now();
                    let outcome = tokio::time::timeout(timeout, capability.call(&params)).await;
                    let elapsed_ms = start.elapsed().as_millis() as u64;

                    let result = match outcome {
                        Ok(Ok(payload)) => {
                            cache::put_quietly(
                                result_cache.as_ref(),
                                &cache_key,
                                payload.clone(),
                                result_ttl,
                            )
                            .await;
                            CapabilityResult::success(&capability_id, params, payload, elapsed_ms)
                        }
                        Ok(Err(e)) => {
                            warn!(capability = %capability_id, error = %e, "Capability call failed");
                            CapabilityResult::failure(&capability_id, params, e.to_string(), elapsed_ms)
                        }
                        Err(_) => {
                            warn!(capability = %capability_id, ?timeout, "Capability call timed out");
                            CapabilityResult::failure(
                                &capability_id,
                                params,
                                format!("timed out after {}s", timeout.as_secs()),
                                elapsed_ms,
                            )
                        }
                    };

                    if let Some(tx) = completion_tx {
                        let _ = tx
                            .send(StreamEvent::status(
                                completion_message(&result.capability, result.success),
                                completion_sid.as_deref(),
                            ))
                            .await;
                    }

                    result
                }),
            ));
        }

        let abort_handles: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();

        let drain = async {
            let mut collected = Vec::with_capacity(handles.len());
            for (idx, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, "Capability task aborted");
                        CapabilityResult::failure(
                            &plan.steps[idx].capability,
                            plan.steps[idx].params.clone(),
                            "task aborted".to_string(),
                            0,
                        )
                    }
                };
                collected.push((idx, result));
            }
            collected
        };

        let collected = if let Some(tx) = events {
            tokio::select! {
                _ = tx.closed() => {
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    debug!("Client gone, aborted pending capability calls");
                    return Err(SearchError::Canceled);
                }
                collected = drain => collected,
            }
        } else {
            drain.await
        };

        for (idx, result) in collected {
            slots[idx] = Some(result);
        }

        let results: Vec<CapabilityResult> = slots.into_iter().flatten().collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        debug!(
            succeeded,
            failed = results.len() - succeeded,
            "Plan execution completed"
        );

        if succeeded == 0 {
            return Err(SearchError::AllCapabilitiesFailed);
        }

        Ok(results)
    }
}

fn step_ticker(step: &PlanStep) -> Option<&str> {
    step.params.get("ticker").and_then(Value::as_str)
}

fn dispatch_message(step: &PlanStep) -> String {
    match (step.capability.as_str(), step_ticker(step)) {
        ("search", _) => "Searching for latest market information...".to_string(),
        ("deep_research", _) => "Conducting deep financial research...".to_string(),
        ("stock_price", Some(ticker)) => format!("Fetching stock price for {}...", ticker),
        ("company_news", Some(ticker)) => format!("Fetching latest news for {}...", ticker),
        ("financial_statements", Some(ticker)) => {
            format!("Retrieving financial statements for {}...", ticker)
        }
        ("insider_trades", Some(ticker)) => format!("Checking insider trades for {}...", ticker),
        ("sec_filings", Some(ticker)) => format!("Retrieving SEC filings for {}...", ticker),
        (other, _) => format!("Calling {}...", other),
    }
}

fn completion_message(capability: &str, success: bool) -> String {
    if success {
        format!("Received data from {}", capability)
    } else {
        format!("{} unavailable, continuing without it", capability)
    }
}
