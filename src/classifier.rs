//! Fast-path classifier
//!
//! Pattern-matches a query against known simple intents (price lookup,
//! latest news, financial statements, insider trades) so the reasoning
//! model never runs for queries a single capability call can answer.
//! Deterministic and side-effect free; any ambiguity defers to the
//! planner.

use crate::capability::is_valid_ticker;
use crate::models::{Plan, PlanSource, PlanStep};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Price,
    News,
    Financials,
    InsiderTrades,
}

impl Intent {
    /// Every fast-path intent maps to exactly one capability. All are
    /// cheap except financial statements, which still skips planning but
    /// runs under the expensive timeout and TTL.
    fn capability(self) -> &'static str {
        match self {
            Intent::Price => "stock_price",
            Intent::News => "company_news",
            Intent::Financials => "financial_statements",
            Intent::InsiderTrades => "insider_trades",
        }
    }
}

lazy_static! {
    static ref PRICE_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)what(?:'s| is) (?:the )?(?:current |latest )?(?:stock )?price (?:of |for )?([A-Za-z]{1,5})\b",
        r"(?i)\bhow much (?:is |does )([A-Za-z]{1,5})(?: cost| trading| worth)\b",
        r"(?i)\b([A-Za-z]{1,5}) (?:stock )?price\b",
        r"(?i)\bprice (?:of |for )([A-Za-z]{1,5})\b",
    ]);
    static ref NEWS_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)what(?:'s| is) (?:the )?(?:latest |recent )?news (?:on |about |for )?([A-Za-z]{1,5})\b",
        r"(?i)\b([A-Za-z]{1,5}) (?:latest |recent )?news\b",
        r"(?i)\bnews (?:on |about |for )([A-Za-z]{1,5})\b",
    ]);
    static ref FINANCIALS_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)what (?:are|is) (?:the )?(?:latest |recent )?financials (?:of |for )?([A-Za-z]{1,5})\b",
        r"(?i)\b([A-Za-z]{1,5}) (?:financials|financial statements?|balance sheet|income statement)\b",
        r"(?i)\bfinancials (?:of |for )([A-Za-z]{1,5})\b",
        r"(?i)\bfinancial statements? (?:of |for )([A-Za-z]{1,5})\b",
    ]);
    static ref INSIDER_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)what (?:are|is) (?:the )?(?:latest |recent )?insider trades (?:of |for )?([A-Za-z]{1,5})\b",
        r"(?i)\b([A-Za-z]{1,5}) insider (?:trades|activity)\b",
        r"(?i)\binsider trades (?:of |for )([A-Za-z]{1,5})\b",
    ]);
}

/// Tokens that pattern captures must never be mistaken for tickers.
const TICKER_STOPWORDS: &[&str] = &[
    "I", "A", "AN", "THE", "AND", "OR", "FOR", "TO", "IN", "ON", "AT", "BY", "OF", "IS", "ARE",
    "WHAT", "HOW", "MUCH", "STOCK", "PRICE", "NEWS", "TODAY", "NOW",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static fast-path pattern must compile"))
        .collect()
}

/// A captured symbol counts as a ticker only when it was written in
/// uppercase; company names in prose fall through to the planner.
fn extract_ticker(capture: &str) -> Option<String> {
    let symbol = capture.trim();
    if symbol.chars().any(|c| c.is_ascii_lowercase()) {
        return None;
    }
    let symbol = symbol.to_string();
    if !is_valid_ticker(&symbol) || TICKER_STOPWORDS.contains(&symbol.as_str()) {
        return None;
    }
    Some(symbol)
}

fn match_intent(patterns: &[Regex], query_text: &str) -> Option<String> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(query_text) {
            if let Some(ticker) = caps.get(1).and_then(|m| extract_ticker(m.as_str())) {
                return Some(ticker);
            }
        }
    }
    None
}

/// Classify a query against the known simple intents.
///
/// Returns the first matching intent's fixed one-step plan, or `None` when
/// no matcher fires or no usable ticker was found.
pub fn classify(query_text: &str) -> Option<Plan> {
    let query_text = query_text.trim();

    let intents: &[(Intent, &Vec<Regex>)] = &[
        (Intent::Price, &PRICE_PATTERNS),
        (Intent::News, &NEWS_PATTERNS),
        (Intent::Financials, &FINANCIALS_PATTERNS),
        (Intent::InsiderTrades, &INSIDER_PATTERNS),
    ];

    for (intent, patterns) in intents {
        if let Some(ticker) = match_intent(patterns, query_text) {
            let step = PlanStep::new(intent.capability(), json!({ "ticker": ticker }));
            return Some(Plan::new(vec![step], PlanSource::FastPath));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_step(query: &str) -> Option<(String, String)> {
        classify(query).map(|plan| {
            assert_eq!(plan.steps.len(), 1);
            assert_eq!(plan.source, PlanSource::FastPath);
            let step = &plan.steps[0];
            (
                step.capability.clone(),
                step.params["ticker"].as_str().unwrap().to_string(),
            )
        })
    }

    #[test]
    fn test_price_queries() {
        let cases = [
            "What is the current price of AAPL?",
            "what's the stock price of AAPL",
            "AAPL price",
            "price for AAPL",
            "how much is AAPL worth",
        ];
        for case in cases {
            assert_eq!(
                single_step(case),
                Some(("stock_price".to_string(), "AAPL".to_string())),
                "failed: {}",
                case
            );
        }
    }

    #[test]
    fn test_news_queries() {
        assert_eq!(
            single_step("latest news for TSLA"),
            Some(("company_news".to_string(), "TSLA".to_string()))
        );
        assert_eq!(
            single_step("What's the news on MSFT?"),
            Some(("company_news".to_string(), "MSFT".to_string()))
        );
    }

    #[test]
    fn test_financial_statement_queries() {
        let cases = [
            "AAPL financial statements",
            "financials for AAPL",
            "what are the latest financials of AAPL",
            "AAPL balance sheet",
        ];
        for case in cases {
            assert_eq!(
                single_step(case),
                Some(("financial_statements".to_string(), "AAPL".to_string())),
                "failed: {}",
                case
            );
        }
    }

    #[test]
    fn test_insider_queries() {
        assert_eq!(
            single_step("insider trades for NVDA"),
            Some(("insider_trades".to_string(), "NVDA".to_string()))
        );
        assert_eq!(
            single_step("MSFT insider activity"),
            Some(("insider_trades".to_string(), "MSFT".to_string()))
        );
    }

    #[test]
    fn test_complex_queries_miss() {
        let cases = [
            "Compare Tesla and Ford in terms of financial performance and stock growth",
            "Should I rebalance my portfolio this quarter?",
            "explain moving averages",
        ];
        for case in cases {
            assert!(classify(case).is_none(), "unexpected match: {}", case);
        }
    }

    #[test]
    fn test_ambiguous_ticker_misses() {
        // Lowercase company-name prose defers to the planner.
        assert!(classify("what is the price of tesla").is_none());
        // Captured stopwords never count as tickers.
        assert!(classify("price of THE").is_none());
        assert!(classify("").is_none());
    }

    #[test]
    fn test_punctuation_tolerance() {
        assert_eq!(
            single_step("   What is the price of AMZN?!  "),
            Some(("stock_price".to_string(), "AMZN".to_string()))
        );
    }
}
