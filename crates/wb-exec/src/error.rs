use std::path::PathBuf;

use thiserror::Error;

/// Why an execution could not be started. Nothing is registered and no
/// process is left running when one of these is returned.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid working directory {}: {reason}", path.display())]
    InvalidWorkingDir { path: PathBuf, reason: String },

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("child process is missing its {0} pipe")]
    MissingPipe(&'static str),

    #[error("execution limit reached ({max})")]
    AtCapacity { max: usize },

    #[error("server is shutting down")]
    ShuttingDown,
}

