use crate::capabilities::CapabilityRegistry;
use crate::stages::{StageName, StageSpec};
use crate::{Error, Result};
use agent::AgentBuilder;
use agent::callbacks::MessageLogger;
use agent::llm::{CHARS_PER_TOKEN, LLM};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct StageResult {
    pub stage: StageName,
    pub content: String,
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub max_capability_calls: usize,
    /// Hard-truncate stage output to roughly its token budget.
    pub enforce_token_budget: bool,
    pub transcript_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_capability_calls: agent::DEFAULT_MAX_TOOL_CALLS,
            enforce_token_budget: false,
            transcript_dir: None,
        }
    }
}

pub struct StageExecutor {
    llm: Arc<dyn LLM + Send + Sync>,
    capabilities: Arc<CapabilityRegistry>,
    config: ExecutorConfig,
}

impl StageExecutor {
    pub fn new(
        llm: Arc<dyn LLM + Send + Sync>,
        capabilities: Arc<CapabilityRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            llm,
            capabilities,
            config,
        }
    }

    pub async fn execute(&self, spec: &StageSpec, input: String, run_id: &str) -> Result<StageResult> {
        let stage = spec.name;
        let mut builder = AgentBuilder::new()
            .llm(self.llm.clone())
            .system_prompt(spec.system_prompt())
            .tools(self.capabilities.tools_for(&spec.capabilities))
            .max_tool_calls(self.config.max_capability_calls);

        if let Some(dir) = &self.config.transcript_dir {
            let logger = transcript(dir, run_id, stage).map_err(|e| stage_error(stage, e))?;
            builder = builder.callback(logger);
        }

        let mut agent = builder.build().map_err(|e| stage_error(stage, e))?;
        let content = agent.answer(input).await.map_err(|e| stage_error(stage, e))?;

        let content = if self.config.enforce_token_budget {
            truncate_to_budget(content, spec.token_budget)
        } else {
            content
        };

        Ok(StageResult { stage, content })
    }
}

fn transcript(
    dir: &Path,
    run_id: &str,
    stage: StageName,
) -> agent::Result<Box<MessageLogger<fs::File>>> {
    fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}.md", run_id)))?;
    MessageLogger::new(stage.agent_name(), file)
}

fn stage_error(stage: StageName, err: agent::Error) -> Error {
    match err {
        agent::Error::ToolLoopExceeded(limit) => Error::CapabilityLoopExceeded { stage, limit },
        agent::Error::IOError(e) => Error::IOError(e),
        source => Error::ModelInvocation { stage, source },
    }
}

fn truncate_to_budget(mut content: String, token_budget: usize) -> String {
    let max_chars = token_budget.saturating_mul(CHARS_PER_TOKEN);
    if let Some((cut, _)) = content.char_indices().nth(max_chars) {
        content.truncate(cut);
        content.push_str("\n\n[truncated]");
    }
    content
}

#[cfg(test)]
mod tests {
    use super::{ExecutorConfig, StageExecutor, truncate_to_budget};
    use crate::capabilities::{AdapterError, CapabilityRegistry, SearchDepth};
    use crate::stages::{StageName, StageRegistry};
    use crate::testing::{MockMarket, MockSearch, StageLLM};
    use crate::{Error, Result};
    use std::sync::Arc;

    fn executor(llm: Arc<StageLLM>, search: MockSearch, config: ExecutorConfig) -> StageExecutor {
        let capabilities = Arc::new(CapabilityRegistry::new(
            Arc::new(search),
            Arc::new(MockMarket::default()),
            SearchDepth::Advanced,
        ));
        StageExecutor::new(llm, capabilities, config)
    }

    #[test]
    fn test_truncate_to_budget() {
        assert_eq!(truncate_to_budget("short".to_string(), 10), "short");
        assert_eq!(truncate_to_budget("abcdefgh".to_string(), 2), "abcdefgh");
        assert_eq!(
            truncate_to_budget("abcdefghij".to_string(), 2),
            "abcdefgh\n\n[truncated]"
        );
        // never splits a multi-byte character
        assert_eq!(
            truncate_to_budget("ééééé".to_string(), 1),
            "éééé\n\n[truncated]"
        );
    }

    #[tokio::test]
    async fn test_research_stage_uses_search() -> Result<()> {
        let llm = Arc::new(StageLLM::new().searching("AAPL news"));
        let search = MockSearch::ok(serde_json::json!({"results": [{"title": "iPhone sales"}]}));
        let executor = executor(llm.clone(), search.clone(), ExecutorConfig::default());
        let stages = StageRegistry::default();

        let result = executor
            .execute(stages.get("research")?, "AAPL".to_string(), "run")
            .await?;

        assert_eq!(result.stage, StageName::Research);
        assert!(result.content.starts_with("research report: "));
        assert!(result.content.contains("iPhone sales"));
        assert_eq!(search.queries().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_adapter_error_becomes_stage_input() -> Result<()> {
        let llm = Arc::new(StageLLM::new().searching("AAPL news"));
        let search = MockSearch::failing(|| AdapterError::Status {
            status: 401,
            body: "invalid api key".to_string(),
        });
        let executor = executor(llm, search, ExecutorConfig::default());
        let stages = StageRegistry::default();

        let result = executor
            .execute(stages.get("research")?, "AAPL".to_string(), "run")
            .await?;

        assert_eq!(
            result.content,
            "research report: Error performing search: provider returned status 401: invalid api key"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_capability_loop_is_bounded() -> Result<()> {
        let llm = Arc::new(StageLLM::new().looping());
        let config = ExecutorConfig {
            max_capability_calls: 2,
            ..ExecutorConfig::default()
        };
        let executor = executor(llm.clone(), MockSearch::default(), config);
        let stages = StageRegistry::default();

        let res = executor
            .execute(stages.get("finance")?, "data".to_string(), "run")
            .await;

        assert!(matches!(
            res,
            Err(Error::CapabilityLoopExceeded {
                stage: StageName::Finance,
                limit: 2
            })
        ));
        assert_eq!(llm.calls().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_model_failure_is_model_invocation_error() -> Result<()> {
        let llm = Arc::new(StageLLM::new().failing_on(StageName::Editorial));
        let executor = executor(llm, MockSearch::default(), ExecutorConfig::default());
        let stages = StageRegistry::default();

        let res = executor
            .execute(stages.get("editorial")?, "all".to_string(), "run")
            .await;

        assert!(matches!(
            res,
            Err(Error::ModelInvocation {
                stage: StageName::Editorial,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_transcript_is_written() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("advisor-transcript-{}", std::process::id()));
        let llm = Arc::new(StageLLM::new());
        let config = ExecutorConfig {
            transcript_dir: Some(dir.clone()),
            ..ExecutorConfig::default()
        };
        let executor = executor(llm, MockSearch::default(), config);
        let stages = StageRegistry::default();

        executor
            .execute(stages.get("analysis")?, "metrics".to_string(), "t1")
            .await?;

        let transcript = std::fs::read_to_string(dir.join("t1.md"))?;
        assert!(transcript.starts_with("## AnalysisAgent"));
        assert!(transcript.contains("analysis report: metrics"));
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
