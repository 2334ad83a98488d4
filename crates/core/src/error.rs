use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the metadata store or the search index.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("search index error: {0}")]
    Index(String),
    #[error("index task {task} failed: {reason}")]
    TaskFailed { task: u64, reason: String },
    #[error("index task {task} did not finish within {timeout:?}")]
    TaskTimeout { task: u64, timeout: Duration },
}

impl From<providers::ProviderError> for SinkError {
    fn from(err: providers::ProviderError) -> Self {
        use providers::ProviderError;
        match err {
            ProviderError::TaskFailed { uid, message } => SinkError::TaskFailed {
                task: uid,
                reason: message,
            },
            ProviderError::TaskTimeout { uid, timeout } => {
                SinkError::TaskTimeout { task: uid, timeout }
            }
            other => SinkError::Index(other.to_string()),
        }
    }
}

/// Why a single file could not be processed. Never fatal for a batch.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to stat file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a regular file: {}", path.display())]
    NotRegular { path: PathBuf },
    #[error("hashing failed for {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to persist {}: {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to create search index: {0}")]
    IndexSetup(#[source] SinkError),
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to enumerate directories: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to watch {}: {reason}", path.display())]
    Watch { path: PathBuf, reason: String },
    #[error("notification source error: {0}")]
    Source(String),
}
