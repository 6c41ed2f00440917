use thiserror::Error;

#[derive(Debug, Error)]
pub enum HayBotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Task cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for HayBotError {
    fn from(e: tokio::task::JoinError) -> Self {
        HayBotError::Perception(format!("task join failed: {e}"))
    }
}

pub type HayBotResult<T> = Result<T, HayBotError>;
