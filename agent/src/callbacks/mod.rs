use crate::Result;
use crate::llm::Message;
use async_trait::async_trait;

mod logger;
pub use logger::MessageLogger;

#[async_trait]
pub trait Callback {
    async fn call(&mut self, history: &[Message]) -> Result<()>;
}
