//! HTTP-backed capability implementations
//!
//! Each provider owns its endpoint, wire format, and auth; the rest of the
//! system sees only the `Capability` contract. All providers share one
//! pooled reqwest client.

use super::{Capability, CapabilityRegistry, InputSchema, ParamKind, ParamSpec};
use crate::config::Config;
use crate::error::SearchError;
use crate::models::CostClass;
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const QUERY_SCHEMA: InputSchema = InputSchema {
    required: &[ParamSpec {
        name: "query",
        kind: ParamKind::Text,
    }],
    optional: &[],
};

const TICKER_SCHEMA: InputSchema = InputSchema {
    required: &[ParamSpec {
        name: "ticker",
        kind: ParamKind::Ticker,
    }],
    optional: &[],
};

fn capability_error(capability: &str, message: impl std::fmt::Display) -> SearchError {
    SearchError::Capability {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

fn require_query(capability: &str, params: &Value) -> Result<String> {
    params
        .get("query")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| capability_error(capability, "expected 'query' in params"))
}

fn require_ticker(capability: &str, params: &Value) -> Result<String> {
    params
        .get("ticker")
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase())
        .ok_or_else(|| capability_error(capability, "expected 'ticker' in params"))
}

//
// ================= Perplexity =================
//

#[derive(Clone)]
struct PerplexityClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl PerplexityClient {
    fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.perplexity_api_key.clone(),
            base_url: config.perplexity_api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn chat(&self, capability: &str, system_prompt: &str, user_content: &str) -> Result<Value> {
        let body = json!({
            "model": "sonar",
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_content}
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| capability_error(capability, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| capability_error(capability, format!("invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(capability_error(
                capability,
                format!("provider returned {}: {}", status, payload),
            ));
        }

        Ok(payload)
    }
}

/// Real-time web search through Perplexity Sonar.
pub struct SearchCapability {
    perplexity: PerplexityClient,
}

#[async_trait::async_trait]
impl Capability for SearchCapability {
    fn id(&self) -> &'static str {
        "search"
    }

    fn description(&self) -> &'static str {
        "Real-time news and market insights via web search"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Cheap
    }

    fn input_schema(&self) -> InputSchema {
        QUERY_SCHEMA
    }

    async fn call(&self, params: &Value) -> Result<Value> {
        let query = require_query(self.id(), params)?;
        self.perplexity
            .chat(
                self.id(),
                "You are a financial research assistant. Provide accurate financial \
                 information with sources.",
                &query,
            )
            .await
    }
}

/// In-depth multi-source research. Slow; only runs when explicitly planned.
pub struct DeepResearchCapability {
    perplexity: PerplexityClient,
}

#[async_trait::async_trait]
impl Capability for DeepResearchCapability {
    fn id(&self) -> &'static str {
        "deep_research"
    }

    fn description(&self) -> &'static str {
        "In-depth financial analysis and company comparison"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Expensive
    }

    fn input_schema(&self) -> InputSchema {
        QUERY_SCHEMA
    }

    async fn call(&self, params: &Value) -> Result<Value> {
        let query = require_query(self.id(), params)?;
        let prompt = format!("Conduct a deep financial analysis on: {}", query);
        self.perplexity
            .chat(
                self.id(),
                "You are a financial analysis expert conducting deep research. Provide \
                 detailed analysis and comparison of companies based on financial metrics, \
                 market trends, and business outlook. Include sources, numerical data, and \
                 specific insights.",
                &prompt,
            )
            .await
    }
}

//
// ================= Polygon =================
//

#[derive(Clone)]
struct PolygonClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl PolygonClient {
    fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.polygon_api_key.clone(),
            base_url: config.polygon_api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, capability: &str, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| capability_error(capability, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| capability_error(capability, format!("invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(capability_error(
                capability,
                format!("provider returned {} for {}: {}", status, path, payload),
            ));
        }

        Ok(payload)
    }
}

/// Previous-day OHLCV aggregate for a ticker.
pub struct StockPriceCapability {
    polygon: PolygonClient,
}

#[async_trait::async_trait]
impl Capability for StockPriceCapability {
    fn id(&self) -> &'static str {
        "stock_price"
    }

    fn description(&self) -> &'static str {
        "Current stock price and daily trading range"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Cheap
    }

    fn input_schema(&self) -> InputSchema {
        TICKER_SCHEMA
    }

    async fn call(&self, params: &Value) -> Result<Value> {
        let ticker = require_ticker(self.id(), params)?;
        let path = format!("/v2/aggs/ticker/{}/prev", ticker);
        self.polygon.get_json(self.id(), &path, &[]).await
    }
}

pub struct CompanyNewsCapability {
    polygon: PolygonClient,
}

#[async_trait::async_trait]
impl Capability for CompanyNewsCapability {
    fn id(&self) -> &'static str {
        "company_news"
    }

    fn description(&self) -> &'static str {
        "Recent news articles for a company"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Cheap
    }

    fn input_schema(&self) -> InputSchema {
        TICKER_SCHEMA
    }

    async fn call(&self, params: &Value) -> Result<Value> {
        let ticker = require_ticker(self.id(), params)?;
        self.polygon
            .get_json(
                self.id(),
                "/v2/reference/news",
                &[("ticker", ticker.as_str()), ("limit", "5")],
            )
            .await
    }
}

pub struct InsiderTradesCapability {
    polygon: PolygonClient,
}

#[async_trait::async_trait]
impl Capability for InsiderTradesCapability {
    fn id(&self) -> &'static str {
        "insider_trades"
    }

    fn description(&self) -> &'static str {
        "Recent insider trading activity for a company"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Cheap
    }

    fn input_schema(&self) -> InputSchema {
        TICKER_SCHEMA
    }

    async fn call(&self, params: &Value) -> Result<Value> {
        let ticker = require_ticker(self.id(), params)?;
        self.polygon
            .get_json(
                self.id(),
                "/v2/reference/insiders",
                &[("ticker", ticker.as_str()), ("limit", "10")],
            )
            .await
    }
}

//
// ================= FinancialDatasets =================
//

#[derive(Clone)]
struct FinancialDatasetsClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FinancialDatasetsClient {
    fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.financial_datasets_api_key.clone(),
            base_url: config
                .financial_datasets_api_url
                .trim_end_matches('/')
                .to_string(),
        }
    }

    async fn get_json(&self, capability: &str, path: &str, ticker: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-API-KEY", &self.api_key)
            .query(&[("ticker", ticker), ("period", "annual"), ("limit", "4")])
            .send()
            .await
            .map_err(|e| capability_error(capability, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| capability_error(capability, format!("invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(capability_error(
                capability,
                format!("provider returned {} for {}: {}", status, path, payload),
            ));
        }

        Ok(payload)
    }
}

/// Income statements, balance sheets, and cash flow statements, combined
/// into one payload.
pub struct FinancialStatementsCapability {
    datasets: FinancialDatasetsClient,
}

#[async_trait::async_trait]
impl Capability for FinancialStatementsCapability {
    fn id(&self) -> &'static str {
        "financial_statements"
    }

    fn description(&self) -> &'static str {
        "Annual financial statements (income, balance sheet, cash flow)"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Expensive
    }

    fn input_schema(&self) -> InputSchema {
        TICKER_SCHEMA
    }

    async fn call(&self, params: &Value) -> Result<Value> {
        let ticker = require_ticker(self.id(), params)?;

        let (income, balance, cashflow) = tokio::join!(
            self.datasets
                .get_json(self.id(), "/financials/income-statements", &ticker),
            self.datasets
                .get_json(self.id(), "/financials/balance-sheets", &ticker),
            self.datasets
                .get_json(self.id(), "/financials/cash-flow-statements", &ticker),
        );
        let (income, balance, cashflow) = (income?, balance?, cashflow?);

        Ok(json!({
            "financials": {
                "income_statements": income.get("income_statements").cloned().unwrap_or(json!([])),
                "balance_sheets": balance.get("balance_sheets").cloned().unwrap_or(json!([])),
                "cash_flow_statements": cashflow.get("cash_flow_statements").cloned().unwrap_or(json!([])),
            }
        }))
    }
}

pub struct SecFilingsCapability {
    datasets: FinancialDatasetsClient,
}

#[async_trait::async_trait]
impl Capability for SecFilingsCapability {
    fn id(&self) -> &'static str {
        "sec_filings"
    }

    fn description(&self) -> &'static str {
        "Recent SEC filings for a company"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Expensive
    }

    fn input_schema(&self) -> InputSchema {
        TICKER_SCHEMA
    }

    async fn call(&self, params: &Value) -> Result<Value> {
        let ticker = require_ticker(self.id(), params)?;
        self.datasets.get_json(self.id(), "/filings", &ticker).await
    }
}

//
// ================= Default Registry =================
//

/// Build the production registry with all HTTP-backed capabilities.
pub fn create_default_registry(config: &Config) -> CapabilityRegistry {
    let client = Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap_or_default();

    let perplexity = PerplexityClient::new(client.clone(), config);
    let polygon = PolygonClient::new(client.clone(), config);
    let datasets = FinancialDatasetsClient::new(client, config);

    let mut registry = CapabilityRegistry::new();

    registry.register(Arc::new(SearchCapability {
        perplexity: perplexity.clone(),
    }));
    registry.register(Arc::new(DeepResearchCapability { perplexity }));

    registry.register(Arc::new(StockPriceCapability {
        polygon: polygon.clone(),
    }));
    registry.register(Arc::new(CompanyNewsCapability {
        polygon: polygon.clone(),
    }));
    registry.register(Arc::new(InsiderTradesCapability { polygon }));

    registry.register(Arc::new(FinancialStatementsCapability {
        datasets: datasets.clone(),
    }));
    registry.register(Arc::new(SecFilingsCapability { datasets }));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let config = Config::from_env();
        let registry = create_default_registry(&config);

        for id in [
            "search",
            "deep_research",
            "stock_price",
            "company_news",
            "insider_trades",
            "financial_statements",
            "sec_filings",
        ] {
            assert!(registry.contains(id), "missing capability: {}", id);
        }

        let price = registry.get("stock_price").unwrap();
        assert_eq!(price.cost_class(), CostClass::Cheap);
        let filings = registry.get("sec_filings").unwrap();
        assert_eq!(filings.cost_class(), CostClass::Expensive);
    }

    #[test]
    fn test_require_helpers_normalize_ticker() {
        let params = json!({"ticker": "aapl"});
        assert_eq!(require_ticker("stock_price", &params).unwrap(), "AAPL");
        assert!(require_ticker("stock_price", &json!({})).is_err());
        assert!(require_query("search", &json!({"query": "q"})).is_ok());
    }
}
