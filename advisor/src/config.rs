use crate::Result;
use crate::capabilities::{
    CapabilityRegistry, SearchDepth, TAVILY_API_BASE, TavilyClient, YAHOO_API_BASE,
    YAHOO_COOKIE_URL, YahooFinance,
};
use crate::executor::{ExecutorConfig, StageExecutor};
use crate::pipeline::Pipeline;
use crate::stages::StageRegistry;
use agent::llm::{GROQ_API_BASE, OpenAI};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Provider and pipeline settings, from flags or the environment.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Chat model used by every stage
    #[arg(long, env = "ADVISOR_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the OpenAI-compatible model provider
    #[arg(long, env = "ADVISOR_API_BASE", default_value = GROQ_API_BASE)]
    pub api_base: String,

    /// Model provider API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Search provider API key
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub search_api_key: Option<String>,

    #[arg(long, env = "TAVILY_API_BASE", default_value = TAVILY_API_BASE)]
    pub search_api_base: String,

    #[arg(long, env = "MARKET_DATA_API_BASE", default_value = YAHOO_API_BASE)]
    pub market_api_base: String,

    /// Page that issues the market data session cookie
    #[arg(long, env = "MARKET_DATA_COOKIE_URL", default_value = YAHOO_COOKIE_URL)]
    pub market_cookie_url: String,

    #[arg(long, value_enum, default_value_t = SearchDepth::Advanced)]
    pub search_depth: SearchDepth,

    /// Capability calls allowed per stage before it is stopped
    #[arg(long, default_value_t = agent::DEFAULT_MAX_TOOL_CALLS)]
    pub max_capability_calls: usize,

    /// Truncate stage output that overruns its token budget
    #[arg(long)]
    pub enforce_token_budget: bool,

    /// Write a markdown transcript of every run into this directory
    #[arg(long, env = "ADVISOR_TRANSCRIPT_DIR")]
    pub transcript_dir: Option<PathBuf>,
}

fn is_set(key: &Option<String>) -> bool {
    key.as_deref().is_some_and(|k| !k.trim().is_empty())
}

impl Settings {
    /// Missing credentials are only reported; calls needing them fail later.
    pub fn log_credentials(&self) {
        for (name, present) in [
            ("GROQ_API_KEY", is_set(&self.api_key)),
            ("TAVILY_API_KEY", is_set(&self.search_api_key)),
        ] {
            if present {
                tracing::info!(credential = name, "credential found");
            } else {
                tracing::warn!(credential = name, "credential not set; calls that need it will fail");
            }
        }
    }

    pub fn build_pipeline(&self) -> Result<Pipeline> {
        let llm = OpenAI::with_provider(
            self.model.clone(),
            &self.api_base,
            self.api_key.as_deref().unwrap_or_default(),
        );

        let capabilities = Arc::new(CapabilityRegistry::new(
            Arc::new(TavilyClient::new(
                &self.search_api_base,
                self.search_api_key.clone(),
            )),
            Arc::new(YahooFinance::new(
                &self.market_api_base,
                &self.market_cookie_url,
            )?),
            self.search_depth,
        ));

        let executor = StageExecutor::new(
            llm,
            capabilities,
            ExecutorConfig {
                max_capability_calls: self.max_capability_calls,
                enforce_token_budget: self.enforce_token_budget,
                transcript_dir: self.transcript_dir.clone(),
            },
        );

        Pipeline::new(StageRegistry::default(), executor)
    }
}
