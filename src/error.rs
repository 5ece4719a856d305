use thiserror::Error;

/// Result type for workshop pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while configuring or running the pipeline
///
/// Cancellation is not an error: a cancelled run still returns `Ok` with
/// partial metrics.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid run configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Stage execution error
    #[error("Stage execution failed: {0}")]
    StageError(String),

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Control feed transport error
    #[error("Control feed error: {0}")]
    FeedError(#[from] std::io::Error),
}
