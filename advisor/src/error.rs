use crate::stages::StageName;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{stage} stage model invocation failed: {source}")]
    ModelInvocation {
        stage: StageName,
        #[source]
        source: agent::Error,
    },

    #[error("{stage} stage exceeded the limit of {limit} capability calls")]
    CapabilityLoopExceeded { stage: StageName, limit: usize },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Query must not be empty")]
    EmptyQuery,

    #[error("Pipeline run cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
