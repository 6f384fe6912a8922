use crate::capabilities::{
    AdapterError, MarketDataProvider, MarketField, MarketSnapshot, SearchDepth, SearchProvider,
};
use crate::pipeline::{Progress, ProgressObserver};
use crate::stages::{StageName, StageRegistry};
use agent::Result;
use agent::llm::{CompletionRequest, CompletionResponse, LLM, Message};
use agent::tools::ToolCall;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _: &Progress) {}
}

type ErrorFactory = Arc<dyn Fn() -> AdapterError + Send + Sync>;

#[derive(Clone, Default)]
pub struct MockSearch {
    response: Option<serde_json::Value>,
    error: Option<ErrorFactory>,
    queries: Arc<Mutex<Vec<(String, SearchDepth)>>>,
}

impl MockSearch {
    pub fn ok(response: serde_json::Value) -> Self {
        Self {
            response: Some(response),
            ..Self::default()
        }
    }

    pub fn failing(error: impl Fn() -> AdapterError + Send + Sync + 'static) -> Self {
        Self {
            error: Some(Arc::new(error)),
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<(String, SearchDepth)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
    ) -> std::result::Result<serde_json::Value, AdapterError> {
        self.queries.lock().unwrap().push((query.to_string(), depth));
        match &self.error {
            Some(error) => Err(error()),
            None => Ok(self
                .response
                .clone()
                .unwrap_or_else(|| serde_json::json!({"results": []}))),
        }
    }
}

#[derive(Clone, Default)]
pub struct MockMarket {
    error: Option<ErrorFactory>,
    requests: Arc<Mutex<Vec<(String, Vec<MarketField>)>>>,
}

impl MockMarket {
    pub fn failing(error: impl Fn() -> AdapterError + Send + Sync + 'static) -> Self {
        Self {
            error: Some(Arc::new(error)),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<(String, Vec<MarketField>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    async fn fetch(
        &self,
        ticker_or_query: &str,
        fields: &[MarketField],
    ) -> std::result::Result<MarketSnapshot, AdapterError> {
        self.requests
            .lock()
            .unwrap()
            .push((ticker_or_query.to_string(), fields.to_vec()));
        match &self.error {
            Some(error) => Err(error()),
            None => Ok(MarketSnapshot {
                symbol: ticker_or_query.to_ascii_uppercase(),
                price: Some(serde_json::json!({"regularMarketPrice": 100.0})),
                ..MarketSnapshot::default()
            }),
        }
    }
}

/// Identifies the stage from the system prompt and answers
/// `"<stage> report: <input>"`.
pub struct StageLLM {
    stages: StageRegistry,
    search_query: Option<String>,
    fail_on: Option<StageName>,
    held: Option<(StageName, Arc<Notify>)>,
    always_call_tools: bool,
    calls: Mutex<Vec<(StageName, String)>>,
}

impl StageLLM {
    pub fn new() -> Self {
        Self {
            stages: StageRegistry::default(),
            search_query: None,
            fail_on: None,
            held: None,
            always_call_tools: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn searching(mut self, query: &str) -> Self {
        self.search_query = Some(query.to_string());
        self
    }

    pub fn failing_on(mut self, stage: StageName) -> Self {
        self.fail_on = Some(stage);
        self
    }

    /// Holds the stage's model call until `release` is notified.
    pub fn holding(mut self, stage: StageName, release: Arc<Notify>) -> Self {
        self.held = Some((stage, release));
        self
    }

    pub fn looping(mut self) -> Self {
        self.always_call_tools = true;
        self
    }

    pub fn calls(&self) -> Vec<(StageName, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stage_order(&self) -> Vec<StageName> {
        let mut order: Vec<StageName> = Vec::new();
        for (stage, _) in self.calls() {
            if order.last() != Some(&stage) {
                order.push(stage);
            }
        }
        order
    }

    pub fn input_of(&self, stage: StageName) -> Option<String> {
        self.calls()
            .into_iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, input)| input)
    }

    fn stage_of(&self, messages: &[Message]) -> StageName {
        let prompt = match messages.first() {
            Some(Message::System(prompt)) => prompt,
            _ => panic!("history must start with the system prompt"),
        };
        StageName::ORDER
            .into_iter()
            .find(|stage| self.stages.get(stage.as_str()).unwrap().system_prompt() == *prompt)
            .expect("system prompt of a registered stage")
    }
}

fn tool_call(name: &str, args: serde_json::Value) -> CompletionResponse {
    CompletionResponse {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            args: args.to_string(),
        }],
    }
}

#[async_trait]
impl LLM for StageLLM {
    async fn completion<'a>(&self, request: CompletionRequest<'a>) -> Result<CompletionResponse> {
        let stage = self.stage_of(request.messages);
        let input = match &request.messages[1] {
            Message::User(input) => input.clone(),
            other => panic!("expected the stage input, got {:?}", other),
        };
        self.calls.lock().unwrap().push((stage, input.clone()));

        if let Some((_, release)) = self.held.as_ref().filter(|(held, _)| *held == stage) {
            release.notified().await;
        }

        if self.fail_on == Some(stage) {
            return Err(agent::Error::LLMResponseError(
                "provider unavailable".to_string(),
            ));
        }

        if let Some(tool) = request.tools.first().filter(|_| self.always_call_tools) {
            return Ok(tool_call(
                &tool.name,
                serde_json::json!({"query": "AAPL", "ticker": "AAPL"}),
            ));
        }

        match (stage, request.messages.last(), &self.search_query) {
            (StageName::Research, Some(Message::User(_)), Some(query)) => Ok(tool_call(
                "web_search",
                serde_json::json!({"query": query}),
            )),
            (_, Some(Message::Tool { result, .. }), _) => Ok(CompletionResponse {
                content: format!("{} report: {}", stage, result),
                tool_calls: vec![],
            }),
            _ => Ok(CompletionResponse {
                content: format!("{} report: {}", stage, input),
                tool_calls: vec![],
            }),
        }
    }
}
