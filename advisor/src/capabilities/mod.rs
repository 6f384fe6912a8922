use crate::stages::CapabilityRef;
use agent::tools::Tool;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

mod tavily;
mod tools;
mod yahoo;

pub use tavily::{TAVILY_API_BASE, TavilyClient};
pub use tools::{MarketDataTool, SearchTool};
pub use yahoo::{YAHOO_API_BASE, YAHOO_COOKIE_URL, YahooFinance};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("{0} is not set")]
    MissingCredentials(&'static str),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no symbol found for {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Malformed(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    #[default]
    Advanced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MarketField {
    Price,
    Recommendations,
    Fundamentals,
}

impl MarketField {
    pub const ALL: [MarketField; 3] = [
        MarketField::Price,
        MarketField::Recommendations,
        MarketField::Fundamentals,
    ];
}

/// Structured market data for one symbol; only requested fields are set.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fundamentals: Option<serde_json::Value>,
}

#[async_trait]
pub trait SearchProvider {
    async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
    ) -> Result<serde_json::Value, AdapterError>;
}

#[async_trait]
pub trait MarketDataProvider {
    async fn fetch(
        &self,
        ticker_or_query: &str,
        fields: &[MarketField],
    ) -> Result<MarketSnapshot, AdapterError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum CapabilityRequest {
    Search(String),
    MarketData(String, Vec<MarketField>),
}

pub struct CapabilityRegistry {
    search: Arc<dyn SearchProvider + Send + Sync>,
    market: Arc<dyn MarketDataProvider + Send + Sync>,
    search_depth: SearchDepth,
}

impl CapabilityRegistry {
    pub fn new(
        search: Arc<dyn SearchProvider + Send + Sync>,
        market: Arc<dyn MarketDataProvider + Send + Sync>,
        search_depth: SearchDepth,
    ) -> Self {
        Self {
            search,
            market,
            search_depth,
        }
    }

    pub async fn dispatch(&self, request: CapabilityRequest) -> Result<String, AdapterError> {
        match request {
            CapabilityRequest::Search(query) => {
                if query.trim().is_empty() {
                    return Err(AdapterError::EmptyQuery);
                }
                tracing::info!(query = %query, depth = ?self.search_depth, "web search");
                let results = self.search.search(&query, self.search_depth).await?;
                render(&results)
            }
            CapabilityRequest::MarketData(ticker, fields) => {
                if ticker.trim().is_empty() {
                    return Err(AdapterError::EmptyQuery);
                }
                let fields = if fields.is_empty() {
                    MarketField::ALL.to_vec()
                } else {
                    fields
                };
                tracing::info!(ticker = %ticker, ?fields, "market data lookup");
                let snapshot = self.market.fetch(&ticker, &fields).await?;
                render(&snapshot)
            }
        }
    }

    pub fn tools_for(self: &Arc<Self>, capabilities: &[CapabilityRef]) -> Vec<Box<dyn Tool + Send>> {
        capabilities
            .iter()
            .map(|capability| -> Box<dyn Tool + Send> {
                match capability {
                    CapabilityRef::Search => Box::new(SearchTool::new(self.clone())),
                    CapabilityRef::MarketData => Box::new(MarketDataTool::new(self.clone())),
                }
            })
            .collect()
    }
}

fn render<T: Serialize>(value: &T) -> Result<String, AdapterError> {
    serde_json::to_string_pretty(value).map_err(|e| AdapterError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{AdapterError, CapabilityRegistry, CapabilityRequest, MarketField, SearchDepth};
    use crate::stages::CapabilityRef;
    use crate::testing::{MockMarket, MockSearch};
    use std::sync::Arc;

    fn registry(search: MockSearch, market: MockMarket) -> Arc<CapabilityRegistry> {
        Arc::new(CapabilityRegistry::new(
            Arc::new(search),
            Arc::new(market),
            SearchDepth::Advanced,
        ))
    }

    #[tokio::test]
    async fn test_dispatch_search_renders_json() -> Result<(), AdapterError> {
        let search = MockSearch::ok(serde_json::json!({"results": [{"title": "Q3 beat"}]}));
        let registry = registry(search.clone(), MockMarket::default());

        let text = registry
            .dispatch(CapabilityRequest::Search("AAPL news".to_string()))
            .await?;

        assert!(text.contains("\"title\": \"Q3 beat\""));
        assert_eq!(
            search.queries(),
            vec![("AAPL news".to_string(), SearchDepth::Advanced)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_rejects_empty_query() {
        let registry = registry(MockSearch::default(), MockMarket::default());

        let res = registry
            .dispatch(CapabilityRequest::Search("  ".to_string()))
            .await;
        assert!(matches!(res, Err(AdapterError::EmptyQuery)));
    }

    #[tokio::test]
    async fn test_dispatch_market_defaults_to_all_fields() -> Result<(), AdapterError> {
        let market = MockMarket::default();
        let registry = registry(MockSearch::default(), market.clone());

        let text = registry
            .dispatch(CapabilityRequest::MarketData("MSFT".to_string(), vec![]))
            .await?;

        assert!(text.contains("\"symbol\": \"MSFT\""));
        assert_eq!(
            market.requests(),
            vec![("MSFT".to_string(), MarketField::ALL.to_vec())]
        );
        Ok(())
    }

    #[test]
    fn test_tools_for_capabilities() {
        let registry = registry(MockSearch::default(), MockMarket::default());

        assert_eq!(registry.tools_for(&[]).len(), 0);

        let names = registry
            .tools_for(&[CapabilityRef::Search, CapabilityRef::MarketData])
            .iter()
            .map(|tool| tool.definition().map(|def| def.name))
            .collect::<agent::Result<Vec<_>>>()
            .expect("tool definitions");
        assert_eq!(names, vec!["web_search", "market_data"]);
    }
}
