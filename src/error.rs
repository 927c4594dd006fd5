use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("workspace does not exist or is not a directory: {0}")]
    InvalidWorkspace(PathBuf),

    #[error("external tool not installed: {0}")]
    ToolNotInstalled(String),

    #[error("no review prompts configured")]
    EmptyPrompts,

    #[error("invalid stage configuration: {0}")]
    InvalidStageConfiguration(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("process error: {0}")]
    Process(String),
}

impl Error {
    /// Validation errors are reported before any subprocess work begins.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidWorkspace(_)
                | Error::ToolNotInstalled(_)
                | Error::EmptyPrompts
                | Error::InvalidStageConfiguration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
