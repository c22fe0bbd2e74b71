use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotebookError>;

#[derive(Error, Debug)]
pub enum NotebookError {
    #[error("Failed to initialize sandbox: {0}")]
    SessionInit(String),

    #[error("Sandbox session has expired")]
    SessionExpired,

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("File staging failed: {0}")]
    Staging(String),

    #[error("Code generation failed: {0}")]
    Generation(String),

    #[error("Output analysis failed: {0}")]
    Analysis(String),

    #[error("Code fix failed: {0}")]
    Fix(String),

    #[error("AI-generated code must be reviewed before it runs")]
    ReviewRequired,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
