use super::{CapabilityRegistry, CapabilityRequest, MarketField};
use agent::Result;
use agent::llm::Message;
use agent::tools::{FunctionalTool, ToolCall, ToolDefinition};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// Free-text web search query
    query: String,
}

pub struct SearchTool(Arc<CapabilityRegistry>);

impl SearchTool {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self(registry)
    }
}

#[async_trait]
impl FunctionalTool for SearchTool {
    fn definition(&self) -> Result<ToolDefinition> {
        ToolDefinition::new::<SearchArgs>(
            "web_search",
            "search the web for recent news, market trends and company information",
        )
    }

    async fn invoke_fn(&mut self, call: &ToolCall) -> Result<Message> {
        let result = match call.args::<SearchArgs>() {
            Ok(args) => self
                .0
                .dispatch(CapabilityRequest::Search(args.query))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "web search failed");
                    format!("Error performing search: {}", e)
                }),
            Err(e) => format!("Error performing search: invalid arguments: {}", e),
        };

        Ok(call.reply(result))
    }
}

#[derive(Deserialize, JsonSchema)]
struct MarketDataArgs {
    /// Ticker symbol, or a company name to resolve to one
    ticker: String,
    /// Data to fetch; all fields when empty
    #[serde(default)]
    fields: Vec<MarketField>,
}

pub struct MarketDataTool(Arc<CapabilityRegistry>);

impl MarketDataTool {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self(registry)
    }
}

#[async_trait]
impl FunctionalTool for MarketDataTool {
    fn definition(&self) -> Result<ToolDefinition> {
        ToolDefinition::new::<MarketDataArgs>(
            "market_data",
            "fetch the stock price, analyst recommendations and fundamental ratios for a ticker",
        )
    }

    async fn invoke_fn(&mut self, call: &ToolCall) -> Result<Message> {
        let result = match call.args::<MarketDataArgs>() {
            Ok(args) => self
                .0
                .dispatch(CapabilityRequest::MarketData(args.ticker, args.fields))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "market data lookup failed");
                    format!("Error fetching market data: {}", e)
                }),
            Err(e) => format!("Error fetching market data: invalid arguments: {}", e),
        };

        Ok(call.reply(result))
    }
}
