//! Financial Search Orchestrator
//!
//! A financial search engine that:
//! - Classifies simple lookups onto a fast path with no model call
//! - Plans multi-capability data retrieval with a reasoning model
//! - Executes capability calls concurrently, tolerating partial failure
//! - Caches plans, capability results, and full answers with distinct TTLs
//! - Streams progress and the synthesized answer over NDJSON
//! - Keeps per-session conversation history for follow-up questions
//!
//! PIPELINE:
//! QUERY → CLASSIFY/PLAN → EXECUTE → SYNTHESIZE → PERSIST → ANSWER

pub mod api;
pub mod cache;
pub mod capability;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod llm;
pub mod models;
pub mod planner;
pub mod session;
pub mod synthesizer;

pub use error::Result;

// Re-export common types
pub use config::Config;
pub use engine::SearchEngine;
pub use models::*;
