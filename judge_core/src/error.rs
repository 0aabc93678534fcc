use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("entity `{0}` not found")]
    NotFound(String),
    #[error("failed in IO: {0}")]
    IO(#[from] std::io::Error),
    #[error("argument provided is error: {0}")]
    Argument(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("store error: {0}")]
    Store(String),
    #[error("judge queue is not running")]
    QueueStopped,
}
