use crate::Result;
use crate::tools::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use std::fmt;

mod openai;
pub use openai::{GROQ_API_BASE, OpenAI};

pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    User(String),
    Assistant(String, Vec<ToolCall>),
    System(String),
    Tool {
        id: String,
        name: String,
        result: String,
    },
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::System(content) => write!(f, "**system**\n\n{}\n\n", content),
            Message::User(content) => write!(f, "**user**\n\n{}\n\n", content),
            Message::Assistant(content, tool_calls) => {
                write!(f, "**assistant**\n\n{}\n\n", content)?;
                for call in tool_calls {
                    write!(f, "{}\n", call)?;
                }
                Ok(())
            }
            Message::Tool { id, name, result } => {
                write!(f, "**tool** {} ({})\n\n```\n{}\n```\n\n", name, id, result)
            }
        }
    }
}

pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
}

pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait LLM {
    async fn completion<'a>(&self, request: CompletionRequest<'a>) -> Result<CompletionResponse>;
}
