use crate::callbacks;
use crate::llm::{self, Message};
use crate::tools;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_MAX_TOOL_CALLS: usize = 10;

type Tool = Box<dyn tools::Tool + Send>;
type Callback = Box<dyn callbacks::Callback + Send>;

pub struct Agent {
    llm: Arc<dyn llm::LLM + Send + Sync>,
    system_prompt: String,
    tools: HashMap<String, Tool>,
    callbacks: Vec<Callback>,
    tool_defs: Vec<tools::ToolDefinition>,
    max_tool_calls: usize,
}

impl Agent {
    async fn execute_tool_call(
        &mut self,
        tool_call: &tools::ToolCall,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>> {
        let tool = self
            .tools
            .get_mut(&tool_call.name)
            .ok_or(Error::ToolDoesNotExist(tool_call.name.clone()))?;

        tracing::debug!(tool = %tool_call.name, id = %tool_call.id, "invoking tool");

        tool.invoke(tool_call, messages).await
    }

    pub async fn run(&mut self, input: String) -> Result<Vec<Message>> {
        let mut messages = vec![
            Message::System(self.system_prompt.clone()),
            Message::User(input),
        ];
        let mut tool_calls_made = 0;

        loop {
            let next = self
                .llm
                .completion(llm::CompletionRequest {
                    messages: &messages,
                    tools: &self.tool_defs,
                })
                .await?;

            let tool_calls = next.tool_calls;
            messages.push(Message::Assistant(next.content, tool_calls.clone()));

            for callback in &mut self.callbacks {
                callback.call(&messages).await?;
            }

            if tool_calls.is_empty() {
                return Ok(messages);
            }

            tool_calls_made += tool_calls.len();
            if tool_calls_made > self.max_tool_calls {
                return Err(Error::ToolLoopExceeded(self.max_tool_calls));
            }

            for tool_call in &tool_calls {
                messages = self.execute_tool_call(tool_call, messages).await?;
            }
        }
    }

    /// Runs the agent and returns the content of its final answer.
    pub async fn answer(&mut self, input: String) -> Result<String> {
        let mut history = self.run(input).await?;

        match history.pop() {
            Some(Message::Assistant(content, _)) => Ok(content),
            _ => Err(Error::LLMResponseError(
                "run ended without an assistant answer".to_string(),
            )),
        }
    }
}

pub struct AgentBuilder {
    llm: Option<Arc<dyn llm::LLM + Send + Sync>>,
    system_prompt: String,
    tools: Vec<Tool>,
    callbacks: Vec<Callback>,
    max_tool_calls: usize,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            llm: None,
            system_prompt: String::new(),
            tools: Vec::new(),
            callbacks: Vec::new(),
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
        }
    }

    pub fn llm(mut self, llm: Arc<dyn llm::LLM + Send + Sync>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn max_tool_calls(mut self, limit: usize) -> Self {
        self.max_tool_calls = limit;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let mut tool_defs = Vec::new();
        let mut tools = HashMap::new();

        for tool in self.tools {
            let def = tool.definition()?;
            tools.insert(def.name.clone(), tool);
            tool_defs.push(def);
        }

        Ok(Agent {
            llm: self
                .llm
                .ok_or(Error::MissingArg("llm is required for agent".to_string()))?,
            system_prompt: self.system_prompt,
            tools,
            tool_defs,
            callbacks: self.callbacks,
            max_tool_calls: self.max_tool_calls,
        })
    }
}
