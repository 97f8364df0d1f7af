//! Environment-backed configuration
//!
//! All tunables come from env vars (loaded from `.env` by the binaries).
//! Cache TTLs are a policy table rather than hard-coded constants.

use std::env;
use std::time::Duration;

/// Cache expiry policy, keyed by what is being cached.
///
/// Cheap capability data (prices, news) goes stale quickly; expensive data
/// (filings, statements) is static enough to hold much longer.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub cheap_result: Duration,
    pub expensive_result: Duration,
    pub plan: Duration,
    pub answer: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            cheap_result: Duration::from_secs(300),
            expensive_result: Duration::from_secs(3600),
            plan: Duration::from_secs(3600),
            answer: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Reasoning model (planner + synthesizer)
    pub openai_api_key: String,
    pub openai_api_url: String,
    pub openai_model: String,

    // Data providers
    pub perplexity_api_key: String,
    pub perplexity_api_url: String,
    pub polygon_api_key: String,
    pub polygon_api_url: String,
    pub financial_datasets_api_key: String,
    pub financial_datasets_api_url: String,

    // Feature flags
    pub enable_fast_path: bool,
    pub enable_caching: bool,
    pub enable_streaming: bool,
    /// Forward synthesizer token deltas as status events on the stream.
    pub stream_tokens: bool,

    // Execution policy
    pub ttl: TtlPolicy,
    pub cheap_call_timeout: Duration,
    pub expensive_call_timeout: Duration,
    pub max_history_turns: usize,

    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let ttl = TtlPolicy {
            cheap_result: env_secs("CACHE_TTL_CHEAP_SECS", 300),
            expensive_result: env_secs("CACHE_TTL_EXPENSIVE_SECS", 3600),
            plan: env_secs("CACHE_TTL_PLAN_SECS", 3600),
            answer: env_secs("CACHE_TTL_ANSWER_SECS", 1800),
        };

        Self {
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            openai_api_url: env_or("OPENAI_API_URL", "https://api.openai.com/v1"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4-turbo"),

            perplexity_api_key: env_or("PERPLEXITY_API_KEY", ""),
            perplexity_api_url: env_or("PERPLEXITY_API_URL", "https://api.perplexity.ai"),
            polygon_api_key: env_or("POLYGON_API_KEY", ""),
            polygon_api_url: env_or("POLYGON_API_URL", "https://api.polygon.io"),
            financial_datasets_api_key: env_or("FINANCIAL_DATASETS_API_KEY", ""),
            financial_datasets_api_url: env_or(
                "FINANCIAL_DATASETS_API_URL",
                "https://api.financialdatasets.ai",
            ),

            enable_fast_path: env_flag("ENABLE_FAST_PATH", true),
            enable_caching: env_flag("ENABLE_CACHING", true),
            enable_streaming: env_flag("ENABLE_STREAMING", true),
            stream_tokens: env_flag("STREAM_TOKENS", false),

            ttl,
            cheap_call_timeout: env_secs("CAPABILITY_TIMEOUT_CHEAP_SECS", 30),
            expensive_call_timeout: env_secs("CAPABILITY_TIMEOUT_EXPENSIVE_SECS", 90),
            max_history_turns: env_or("MAX_HISTORY_TURNS", "10").parse().unwrap_or(10),

            port: env_or("PORT", "8000").parse().unwrap_or(8000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v.to_lowercase() == "true" || v == "1",
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_policy_defaults() {
        let ttl = TtlPolicy::default();
        assert!(ttl.cheap_result < ttl.expensive_result);
        assert_eq!(ttl.answer, Duration::from_secs(1800));
    }

    #[test]
    fn test_env_helpers() {
        assert_eq!(env_or("DEFINITELY_NOT_SET_XYZ", "fallback"), "fallback");
        assert!(env_flag("DEFINITELY_NOT_SET_XYZ", true));
        assert_eq!(env_secs("DEFINITELY_NOT_SET_XYZ", 7), Duration::from_secs(7));
    }
}
