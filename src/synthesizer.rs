//! Answer synthesizer
//!
//! Folds successful capability payloads and conversation history into one
//! reasoning-model pass that produces the final prose answer plus a
//! deduplicated source list. Failed capability results contribute nothing,
//! including to citations.

use crate::error::SearchError;
use crate::llm::{ChatMessage, LlmClient};
use crate::models::{CapabilityResult, Source, Turn};
use crate::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const SYSTEM_PROMPT: &str = "\
You are a specialized financial assistant that provides accurate information about stocks, \
financial markets, and company data. Use the provided financial data to give informative, \
concise, and accurate responses. If you don't have the data to answer a question, say so \
clearly. Format your response in clear markdown with relevant numbers, percentages, and \
dates when available. Cite your sources at the end, and suggest relevant follow-up \
questions based on the data.";

pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmClient>,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_messages(
        &self,
        query_text: &str,
        results: &[CapabilityResult],
        history: &[Turn],
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        for turn in history {
            messages.push(ChatMessage::user(&turn.query));
            messages.push(ChatMessage::assistant(&turn.answer));
        }
        messages.push(ChatMessage::user(query_text));
        messages.push(ChatMessage::system(format!(
            "Here is the financial data related to the query:\n\n{}",
            format_context(results)
        )));
        messages
    }

    /// Produce the final answer and its source list in one call.
    pub async fn synthesize(
        &self,
        query_text: &str,
        results: &[CapabilityResult],
        history: &[Turn],
    ) -> Result<(String, Vec<Source>)> {
        let messages = self.build_messages(query_text, results, history);

        debug!(
            result_count = results.len(),
            history_turns = history.len(),
            "Synthesizing answer"
        );

        let answer = self
            .llm
            .complete(&messages, 0.5, 2000)
            .await
            .map_err(synthesis_error)?;

        Ok((answer, extract_sources(results)))
    }

    /// Streaming variant: token deltas are forwarded through `tokens` as
    /// they arrive; the assembled full text is returned for the terminal
    /// event and session persistence. A canceled request propagates as
    /// `SearchError::Canceled` so no partial turn is persisted.
    pub async fn synthesize_streaming(
        &self,
        query_text: &str,
        results: &[CapabilityResult],
        history: &[Turn],
        tokens: mpsc::Sender<String>,
    ) -> Result<(String, Vec<Source>)> {
        let messages = self.build_messages(query_text, results, history);

        let answer = self
            .llm
            .complete_streaming(&messages, 0.5, 2000, tokens)
            .await
            .map_err(synthesis_error)?;

        Ok((answer, extract_sources(results)))
    }
}

fn synthesis_error(e: SearchError) -> SearchError {
    match e {
        SearchError::Canceled => SearchError::Canceled,
        other => SearchError::Synthesis(other.to_string()),
    }
}

//
// ================= Source Extraction =================
//

/// Pull title/url citations out of successful payloads, deduplicated by
/// url. Failed capabilities never appear in citations.
pub fn extract_sources(results: &[CapabilityResult]) -> Vec<Source> {
    let mut sources = Vec::new();
    let mut seen_urls: HashSet<String> = HashSet::new();

    let mut push = |title: Option<String>, url: Option<String>, sources: &mut Vec<Source>| {
        if let Some(u) = &url {
            if !u.is_empty() && !seen_urls.insert(u.clone()) {
                return;
            }
        }
        sources.push(Source { title, url });
    };

    for result in results.iter().filter(|r| r.success) {
        match result.capability.as_str() {
            "search" | "deep_research" => {
                let message = result
                    .payload
                    .pointer("/choices/0/message")
                    .cloned()
                    .unwrap_or(Value::Null);

                if let Some(documents) = message.pointer("/context/documents").and_then(Value::as_array) {
                    for doc in documents {
                        let url = doc.get("url").and_then(Value::as_str).map(String::from);
                        let title = doc
                            .get("title")
                            .and_then(Value::as_str)
                            .map(String::from)
                            .or_else(|| url.clone());
                        push(title, url, &mut sources);
                    }
                }

                if let Some(citations) = result.payload.get("citations").and_then(Value::as_array) {
                    for citation in citations.iter().filter_map(Value::as_str) {
                        push(
                            Some(citation.to_string()),
                            Some(citation.to_string()),
                            &mut sources,
                        );
                    }
                }
            }
            "company_news" => {
                if let Some(items) = result.payload.get("results").and_then(Value::as_array) {
                    for item in items.iter().take(3) {
                        let title = item
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or("News Article")
                            .to_string();
                        let url = item
                            .get("article_url")
                            .and_then(Value::as_str)
                            .map(String::from);
                        push(Some(title), url, &mut sources);
                    }
                }
            }
            _ => {}
        }
    }

    sources
}

//
// ================= Context Formatting =================
//

/// Render successful capability payloads as one structured prompt block.
fn format_context(results: &[CapabilityResult]) -> String {
    let mut out = String::new();

    for result in results.iter().filter(|r| r.success) {
        match result.capability.as_str() {
            "search" | "deep_research" => format_search(result, &mut out),
            "stock_price" => format_price(result, &mut out),
            "company_news" => format_news(result, &mut out),
            "financial_statements" => format_financials(result, &mut out),
            "sec_filings" => format_filings(result, &mut out),
            "insider_trades" => format_insider_trades(result, &mut out),
            other => {
                let _ = writeln!(out, "## {} Data\n{}\n", other, result.payload);
            }
        }
    }

    if out.is_empty() {
        out.push_str("No provider data was available for this query.\n");
    }

    out
}

fn result_ticker(result: &CapabilityResult) -> &str {
    result
        .params
        .get("ticker")
        .and_then(Value::as_str)
        .unwrap_or("?")
}

fn format_search(result: &CapabilityResult, out: &mut String) {
    let heading = if result.capability == "deep_research" {
        "Deep Research Results"
    } else {
        "Web Search Results"
    };

    if let Some(content) = result
        .payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        let _ = writeln!(out, "## {}\n{}\n", heading, content);
    }

    if let Some(citations) = result.payload.get("citations").and_then(Value::as_array) {
        let _ = writeln!(out, "### Sources:");
        for (i, citation) in citations.iter().filter_map(Value::as_str).enumerate() {
            let _ = writeln!(out, "[{}] {}", i + 1, citation);
        }
        out.push('\n');
    }
}

fn format_price(result: &CapabilityResult, out: &mut String) {
    let ticker = result_ticker(result);
    let _ = writeln!(out, "## {} Stock Price", ticker);

    if let Some(bar) = result.payload.pointer("/results/0") {
        for (label, field) in [
            ("Close Price", "c"),
            ("Open Price", "o"),
            ("High", "h"),
            ("Low", "l"),
            ("Volume", "v"),
        ] {
            if let Some(value) = bar.get(field) {
                let _ = writeln!(out, "- {}: {}", label, value);
            }
        }
    }
    out.push('\n');
}

fn format_news(result: &CapabilityResult, out: &mut String) {
    let ticker = result_ticker(result);
    let _ = writeln!(out, "## {} Recent News", ticker);

    if let Some(items) = result.payload.get("results").and_then(Value::as_array) {
        for item in items.iter().take(3) {
            let title = item.get("title").and_then(Value::as_str).unwrap_or("No title");
            let published = item
                .get("published_utc")
                .and_then(Value::as_str)
                .unwrap_or("N/A");
            let _ = writeln!(out, "- {} (published {})", title, published);
            if let Some(description) = item.get("description").and_then(Value::as_str) {
                let summary: String = description.chars().take(150).collect();
                let _ = writeln!(out, "  Summary: {}...", summary);
            }
        }
    }
    out.push('\n');
}

fn format_financials(result: &CapabilityResult, out: &mut String) {
    let ticker = result_ticker(result);
    let _ = writeln!(out, "## {} Financial Statements", ticker);

    let sections = [
        ("Income Statements", "income_statements", &[
            "total_revenue",
            "gross_profit",
            "operating_income",
            "net_income",
            "earnings_per_share",
        ] as &[&str]),
        ("Balance Sheets", "balance_sheets", &[
            "total_assets",
            "total_liabilities",
            "total_equity",
            "cash_and_equivalents",
            "total_debt",
        ]),
        ("Cash Flow Statements", "cash_flow_statements", &[
            "operating_cash_flow",
            "free_cash_flow",
            "capital_expenditures",
        ]),
    ];

    for (heading, key, metrics) in sections {
        let Some(statements) = result
            .payload
            .pointer(&format!("/financials/{}", key))
            .and_then(Value::as_array)
        else {
            continue;
        };
        if statements.is_empty() {
            continue;
        }

        let _ = writeln!(out, "### {}", heading);
        for statement in statements.iter().take(2) {
            let fiscal_year = statement
                .get("fiscal_year")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let _ = writeln!(out, "Fiscal Year {}:", fiscal_year);
            for metric in metrics {
                if let Some(value) = statement.get(*metric) {
                    let _ = writeln!(out, "- {}: {}", metric.replace('_', " "), value);
                }
            }
        }
    }
    out.push('\n');
}

fn format_filings(result: &CapabilityResult, out: &mut String) {
    let ticker = result_ticker(result);
    let _ = writeln!(out, "## {} SEC Filings", ticker);

    if let Some(filings) = result.payload.get("filings").and_then(Value::as_array) {
        for filing in filings.iter().take(3) {
            let form = filing.get("form_type").and_then(Value::as_str).unwrap_or("N/A");
            let date = filing
                .get("filing_date")
                .and_then(Value::as_str)
                .unwrap_or("N/A");
            let _ = writeln!(out, "- Form {}: filed {}", form, date);
        }
    }
    out.push('\n');
}

fn format_insider_trades(result: &CapabilityResult, out: &mut String) {
    let ticker = result_ticker(result);
    let _ = writeln!(out, "## {} Insider Trades", ticker);

    if let Some(trades) = result.payload.get("results").and_then(Value::as_array) {
        for trade in trades.iter().take(5) {
            let name = trade
                .get("name")
                .or_else(|| trade.get("insider_name"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            let shares = trade
                .get("shares")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let kind = trade
                .get("transaction_type")
                .and_then(Value::as_str)
                .unwrap_or("");
            let date = trade
                .get("trade_date")
                .or_else(|| trade.get("transaction_date"))
                .and_then(Value::as_str)
                .unwrap_or("N/A");
            let _ = writeln!(out, "- {}: {} {} shares on {}", name, kind, shares, date);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use serde_json::json;

    fn search_result(urls: &[&str]) -> CapabilityResult {
        CapabilityResult::success(
            "search",
            json!({"query": "markets"}),
            json!({
                "choices": [{"message": {"content": "Markets were mixed today."}}],
                "citations": urls,
            }),
            12,
        )
    }

    #[test]
    fn test_sources_deduplicated_by_url() {
        let results = vec![
            search_result(&["https://a.example", "https://b.example"]),
            search_result(&["https://b.example", "https://c.example"]),
        ];

        let sources = extract_sources(&results);
        let urls: Vec<_> = sources.iter().filter_map(|s| s.url.as_deref()).collect();
        assert_eq!(urls, vec!["https://a.example", "https://b.example", "https://c.example"]);
    }

    #[test]
    fn test_failed_capability_yields_no_sources() {
        let failed = CapabilityResult::failure(
            "company_news",
            json!({"ticker": "AAPL"}),
            "timed out".to_string(),
            30_000,
        );
        let results = vec![search_result(&["https://a.example"]), failed];

        let sources = extract_sources(&results);
        assert_eq!(sources.len(), 1);
        assert!(!format_context(&results).contains("Recent News"));
    }

    #[test]
    fn test_news_sources_use_article_urls() {
        let news = CapabilityResult::success(
            "company_news",
            json!({"ticker": "AAPL"}),
            json!({"results": [
                {"title": "Apple launches a thing", "article_url": "https://news.example/1"},
                {"title": "Apple earnings beat", "article_url": "https://news.example/2"},
            ]}),
            20,
        );

        let sources = extract_sources(&[news]);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title.as_deref(), Some("Apple launches a thing"));
    }

    #[test]
    fn test_price_context_formatting() {
        let price = CapabilityResult::success(
            "stock_price",
            json!({"ticker": "AAPL"}),
            json!({"results": [{"c": 210.5, "o": 208.0, "h": 211.0, "l": 207.2, "v": 5000}]}),
            5,
        );

        let context = format_context(&[price]);
        assert!(context.contains("AAPL Stock Price"));
        assert!(context.contains("Close Price: 210.5"));
    }

    #[tokio::test]
    async fn test_synthesize_returns_answer_and_sources() {
        let synthesizer =
            AnswerSynthesizer::new(Arc::new(MockLlm::single("Markets were mixed today.")));
        let results = vec![search_result(&["https://a.example"])];

        let (answer, sources) = synthesizer
            .synthesize("how are markets doing", &results, &[])
            .await
            .unwrap();
        assert_eq!(answer, "Markets were mixed today.");
        assert_eq!(sources.len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_cancellation_propagates() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(MockLlm::single("answer")));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let err = synthesizer
            .synthesize_streaming("q", &[search_result(&[])], &[], tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Canceled));
    }

    #[tokio::test]
    async fn test_model_failure_is_synthesis_error() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(MockLlm::new(vec![])));
        let err = synthesizer
            .synthesize("q", &[search_result(&[])], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Synthesis(_)));
    }
}
