use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovwrapError {
    #[error("Both a command `{command}` and a Node.js entry point {entry_path} don't exist.")]
    CommandNotFound { command: String, entry_path: String },

    #[error("Required tool `{0}` is not installed")]
    ToolNotFound(String),

    #[error("Failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process `{program}` exceeded the execution timeout")]
    ChildTimedOut { program: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl CovwrapError {
    /// Exit code this error should terminate the wrapper with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandNotFound { .. } => 127,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CovwrapError>;
