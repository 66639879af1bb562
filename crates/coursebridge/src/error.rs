use thiserror::Error;

/// Central error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("LMS error: {0}")]
    Lms(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
