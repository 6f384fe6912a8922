use crate::Result;
use crate::callbacks::Callback;
use crate::llm::Message;
use async_trait::async_trait;
use std::io::Write;

/// Writes the agent history as a markdown transcript, one section per step.
pub struct MessageLogger<W: Write + Send> {
    written: usize,
    writer: W,
    step: u32,
}

impl<W: Write + Send> MessageLogger<W> {
    pub fn new(name: &str, mut writer: W) -> Result<Box<Self>> {
        write!(writer, "## {}\n\n", name)?;

        Ok(Box::new(Self {
            written: 0,
            writer,
            step: 0,
        }))
    }

    fn display_messages(&mut self, messages: &[Message]) -> Result<()> {
        write!(self.writer, "### Step {}\n\n", self.step)?;

        messages
            .iter()
            .try_for_each(|m| write!(self.writer, "{}", m))?;

        write!(self.writer, "---\n\n")?;

        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: Write + Send> Callback for MessageLogger<W> {
    async fn call(&mut self, history: &[Message]) -> Result<()> {
        // history only grows within a run
        let start = self.written.min(history.len());
        self.display_messages(&history[start..])?;
        self.writer.flush()?;

        self.step += 1;
        self.written = history.len();

        Ok(())
    }
}
