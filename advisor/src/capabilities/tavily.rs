use super::{AdapterError, SearchDepth, SearchProvider};
use async_trait::async_trait;
use serde::Serialize;

pub const TAVILY_API_BASE: &str = "https://api.tavily.com";

const MAX_RESULTS: usize = 5;

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    search_depth: SearchDepth,
    max_results: usize,
}

pub struct TavilyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TavilyClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
    ) -> Result<serde_json::Value, AdapterError> {
        if query.trim().is_empty() {
            return Err(AdapterError::EmptyQuery);
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(AdapterError::MissingCredentials("TAVILY_API_KEY"))?;

        let res = self
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(api_key)
            .json(&SearchRequest {
                query,
                search_depth: depth,
                max_results: MAX_RESULTS,
            })
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
}
