use crate::pipeline::{Pipeline, Progress, ProgressObserver};
use crate::stages::StageName;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BANNER: &str = "💼 Welcome to Investment Analyst AI\n\
Ask about any company or stock to get a full analysis. Type 'exit' to quit.\n\n";
const PROMPT: &str = "📈 You: ";
const FAREWELL: &str = "👋 Exiting... Happy Investing!\n";

#[async_trait]
pub trait ReportRunner: Send + Sync {
    async fn report(&self, query: &str, cancel: &CancellationToken) -> Result<String>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Skip,
    Query(&'a str),
}

pub fn parse_line(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        Command::Skip
    } else if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        Command::Exit
    } else {
        Command::Query(line)
    }
}

// Tokio keeps its SIGINT handler once installed, so one listener serves
// the whole session.
pub fn interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Reads queries line by line until `exit`, `quit`, end of input or an
/// interrupt at the prompt. An interrupt during a run cancels that run only.
pub async fn repl<R, W>(
    runner: &dyn ReportRunner,
    input: R,
    mut output: W,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(BANNER.as_bytes()).await?;
    let mut lines = input.lines();

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = interrupts.recv() => {
                output.write_all(b"\n").await?;
                output.write_all(FAREWELL.as_bytes()).await?;
                break;
            }
        };
        let Some(line) = line else {
            output.write_all(b"\n").await?;
            break;
        };

        match parse_line(&line) {
            Command::Exit => {
                output.write_all(FAREWELL.as_bytes()).await?;
                break;
            }
            Command::Skip => continue,
            Command::Query(query) => {
                let cancel = CancellationToken::new();
                let run = runner.report(query, &cancel);
                tokio::pin!(run);
                let result = tokio::select! {
                    result = &mut run => result,
                    Some(()) = interrupts.recv() => {
                        tracing::info!("interrupted, cancelling the current run");
                        cancel.cancel();
                        run.await
                    }
                };

                match result {
                    Ok(report) => {
                        let text = format!("\n📑 Final Investment Report:\n\n{}\n\n", report);
                        output.write_all(text.as_bytes()).await?;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "report failed");
                        output
                            .write_all(format!("\n❌ Error: {}\n\n", e).as_bytes())
                            .await?;
                    }
                }
            }
        }
    }

    output.flush().await?;
    Ok(())
}

struct StepPrinter;

impl ProgressObserver for StepPrinter {
    fn on_progress(&self, progress: &Progress) {
        let line = match progress.stage {
            Some(StageName::Research) => "🔍 Step 1: Research Agent Running...",
            Some(StageName::Finance) => "📊 Step 2: Finance Agent Running...",
            Some(StageName::Analysis) => "📈 Step 3: Analysis Agent Running...",
            Some(StageName::Editorial) => "📝 Step 4: Editor Agent Compiling Final Report...",
            None => return,
        };
        eprintln!("\n{}", line);
    }
}

pub struct InteractiveRunner {
    pipeline: Arc<Pipeline>,
}

impl InteractiveRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ReportRunner for InteractiveRunner {
    async fn report(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        let report = self.pipeline.run(query, &StepPrinter, cancel).await?;
        for result in report.context.results() {
            tracing::debug!(stage = %result.stage, chars = result.content.len(), "stage output");
        }
        Ok(report.content)
    }
}
