use super::{AdapterError, MarketDataProvider, MarketField, MarketSnapshot};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

pub const YAHOO_API_BASE: &str = "https://query2.finance.yahoo.com";
pub const YAHOO_COOKIE_URL: &str = "https://fc.yahoo.com";

const CLIENT_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; advisor/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

const FUNDAMENTAL_MODULES: [&str; 3] = ["financialData", "defaultKeyStatistics", "summaryDetail"];

#[derive(Deserialize)]
struct SymbolSearch {
    #[serde(default)]
    quotes: Vec<SymbolQuote>,
}

#[derive(Deserialize)]
struct SymbolQuote {
    symbol: String,
}

#[derive(Deserialize)]
struct QuoteSummaryEnvelope {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummary,
}

#[derive(Deserialize)]
struct QuoteSummary {
    result: Option<Vec<Value>>,
    error: Option<Value>,
}

// quoteSummary wants a session cookie plus the crumb issued for it.
pub struct YahooFinance {
    http: reqwest::Client,
    base_url: String,
    cookie_url: String,
    crumb: Mutex<Option<String>>,
}

impl YahooFinance {
    pub fn new(base_url: &str, cookie_url: &str) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_url: cookie_url.to_string(),
            crumb: Mutex::new(None),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        query: &[(&str, &str)],
    ) -> Result<T, AdapterError> {
        let res = self
            .http
            .get(url)
            .header(USER_AGENT, CLIENT_AGENT)
            .query(query)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }

        Ok(res.json().await?)
    }

    async fn crumb(&self) -> Result<String, AdapterError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        // Only the Set-Cookie matters here; the page itself is usually a 404.
        self.http
            .get(&self.cookie_url)
            .header(USER_AGENT, CLIENT_AGENT)
            .send()
            .await?;

        let res = self
            .http
            .get(format!("{}/v1/test/getcrumb", self.base_url))
            .header(USER_AGENT, CLIENT_AGENT)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let crumb = body.trim();
        if crumb.is_empty() || crumb.contains(char::is_whitespace) || crumb.starts_with('<') {
            return Err(AdapterError::Malformed(format!("unexpected crumb: {crumb}")));
        }
        tracing::debug!("obtained market data crumb");
        *cached = Some(crumb.to_string());
        Ok(crumb.to_string())
    }

    async fn search_symbol(&self, query: &str) -> Result<String, AdapterError> {
        let found: SymbolSearch = self
            .get(
                format!("{}/v1/finance/search", self.base_url),
                &[("q", query), ("quotesCount", "1"), ("newsCount", "0")],
            )
            .await?;

        found
            .quotes
            .into_iter()
            .next()
            .map(|quote| quote.symbol)
            .ok_or_else(|| AdapterError::NotFound(query.to_string()))
    }

    async fn quote_summary(&self, symbol: &str, modules: &str) -> Result<Value, AdapterError> {
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, symbol);
        let crumb = self.crumb().await?;
        let mut res = self
            .get::<QuoteSummaryEnvelope>(
                url.clone(),
                &[("modules", modules), ("crumb", crumb.as_str())],
            )
            .await;

        // A stale crumb gets one fresh handshake.
        let unauthorized = StatusCode::UNAUTHORIZED.as_u16();
        if matches!(&res, Err(AdapterError::Status { status, .. }) if *status == unauthorized) {
            self.crumb.lock().await.take();
            let crumb = self.crumb().await?;
            res = self
                .get(url, &[("modules", modules), ("crumb", crumb.as_str())])
                .await;
        }
        let envelope = res?;

        if let Some(error) = envelope.quote_summary.error.filter(|e| !e.is_null()) {
            return Err(AdapterError::Malformed(error.to_string()));
        }

        envelope
            .quote_summary
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| AdapterError::NotFound(symbol.to_string()))
    }

    /// Ticker-shaped input is tried as a symbol first; anything else, or a
    /// symbol that does not exist, goes through the symbol search.
    async fn lookup(&self, input: &str, modules: &str) -> Result<(String, Value), AdapterError> {
        if !looks_like_ticker(input) {
            let symbol = self.search_symbol(input).await?;
            let result = self.quote_summary(&symbol, modules).await?;
            return Ok((symbol, result));
        }

        let symbol = input.to_ascii_uppercase();
        match self.quote_summary(&symbol, modules).await {
            Ok(result) => Ok((symbol, result)),
            Err(err @ (AdapterError::NotFound(_) | AdapterError::Status { status: 404, .. })) => {
                match self.search_symbol(input).await {
                    Ok(found) if found != symbol => {
                        tracing::debug!(input, symbol = %found, "resolved through symbol search");
                        let result = self.quote_summary(&found, modules).await?;
                        Ok((found, result))
                    }
                    _ => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn looks_like_ticker(input: &str) -> bool {
    !input.is_empty()
        && input.len() <= 12
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
}

fn modules_for(fields: &[MarketField]) -> Vec<&'static str> {
    let mut modules = Vec::new();
    for field in fields {
        let wanted: &[&'static str] = match field {
            MarketField::Price => &["price"],
            MarketField::Recommendations => &["recommendationTrend"],
            MarketField::Fundamentals => &FUNDAMENTAL_MODULES,
        };
        for module in wanted {
            if !modules.contains(module) {
                modules.push(*module);
            }
        }
    }
    modules
}

#[async_trait]
impl MarketDataProvider for YahooFinance {
    async fn fetch(
        &self,
        ticker_or_query: &str,
        fields: &[MarketField],
    ) -> Result<MarketSnapshot, AdapterError> {
        let input = ticker_or_query.trim();
        if input.is_empty() {
            return Err(AdapterError::EmptyQuery);
        }
        let modules = modules_for(fields).join(",");
        let (symbol, result) = self.lookup(input, &modules).await?;

        let mut snapshot = MarketSnapshot {
            symbol,
            ..MarketSnapshot::default()
        };
        for field in fields {
            match field {
                MarketField::Price => snapshot.price = result.get("price").cloned(),
                MarketField::Recommendations => {
                    snapshot.recommendations = result.get("recommendationTrend").cloned()
                }
                MarketField::Fundamentals => {
                    let merged: serde_json::Map<String, Value> = FUNDAMENTAL_MODULES
                        .iter()
                        .filter_map(|module| {
                            result.get(*module).map(|v| (module.to_string(), v.clone()))
                        })
                        .collect();
                    snapshot.fundamentals = Some(Value::Object(merged));
                }
            }
        }

        Ok(snapshot)
    }
}
