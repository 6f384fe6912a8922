use crate::executor::{StageExecutor, StageResult};
use crate::stages::{StageName, StageRegistry};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
    results: Vec<StageResult>,
}

impl PipelineContext {
    pub fn push(&mut self, result: StageResult) {
        self.results.push(result);
    }

    pub fn get(&self, stage: StageName) -> Option<&StageResult> {
        self.results.iter().find(|result| result.stage == stage)
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    fn content(&self, stage: StageName) -> &str {
        self.get(stage).map(|r| r.content.as_str()).unwrap_or("")
    }
}

#[derive(Clone, Debug)]
pub struct Report {
    pub content: String,
    pub context: PipelineContext,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    pub fraction: f32,
    pub description: &'static str,
    /// `None` once the run is complete.
    pub stage: Option<StageName>,
}

impl Progress {
    fn stage(stage: StageName) -> Self {
        Self {
            fraction: stage.progress(),
            description: stage.progress_description(),
            stage: Some(stage),
        }
    }

    fn done() -> Self {
        Self {
            fraction: 1.0,
            description: "Done!",
            stage: None,
        }
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

/// Finance and analysis only see the immediately preceding stage.
pub fn stage_input(stage: StageName, query: &str, context: &PipelineContext) -> String {
    match stage {
        StageName::Research => query.to_string(),
        StageName::Finance => format!(
            "Based on this data: {}",
            context.content(StageName::Research)
        ),
        StageName::Analysis => format!(
            "Based on the financial interpretation: {}",
            context.content(StageName::Finance)
        ),
        StageName::Editorial => format!(
            "Research Summary:\n{}\n\nFinancial Interpretation:\n{}\n\nInvestment Analysis:\n{}\n",
            context.content(StageName::Research),
            context.content(StageName::Finance),
            context.content(StageName::Analysis),
        ),
    }
}

fn next_run_id() -> String {
    static RUNS: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}", millis, RUNS.fetch_add(1, Ordering::Relaxed))
}

pub struct Pipeline {
    stages: StageRegistry,
    executor: StageExecutor,
}

impl Pipeline {
    pub fn new(stages: StageRegistry, executor: StageExecutor) -> Result<Self> {
        stages.validate()?;
        Ok(Self { stages, executor })
    }

    pub async fn run(
        &self,
        query: &str,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        if query.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }

        let run_id = next_run_id();
        let mut context = PipelineContext::default();
        tracing::info!(run = %run_id, query = %query, "pipeline run started");

        for stage in StageName::ORDER {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            observer.on_progress(&Progress::stage(stage));

            let spec = self.stages.get(stage.as_str())?;
            let input = stage_input(stage, query, &context);
            tracing::info!(run = %run_id, %stage, input_chars = input.len(), "stage started");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.executor.execute(spec, input, &run_id) => result,
            };

            let result = match result {
                Ok(result) => result,
                Err(Error::CapabilityLoopExceeded { stage, limit }) => {
                    tracing::warn!(run = %run_id, %stage, limit, "capability call limit exceeded");
                    StageResult {
                        stage,
                        content: format!(
                            "The {} stage was stopped after exceeding {} capability calls.",
                            stage, limit
                        ),
                    }
                }
                Err(e) => {
                    tracing::error!(run = %run_id, %stage, error = %e, "stage failed");
                    return Err(e);
                }
            };

            tracing::info!(
                run = %run_id,
                %stage,
                output_chars = result.content.len(),
                "stage finished"
            );
            context.push(result);
        }

        observer.on_progress(&Progress::done());

        Ok(Report {
            content: context.content(StageName::Editorial).to_string(),
            context,
        })
    }
}
