use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetourError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Control channel closed")]
    ControlChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<url::ParseError> for DetourError {
    fn from(err: url::ParseError) -> Self {
        DetourError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for DetourError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DetourError::Transport(format!("request timed out: {}", err))
        } else {
            DetourError::Transport(err.to_string())
        }
    }
}

impl From<http::Error> for DetourError {
    fn from(err: http::Error) -> Self {
        DetourError::Http(err.to_string())
    }
}

impl DetourError {
    /// Returns `true` for failures caused by the network rather than by the
    /// request itself.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            DetourError::Transport(_) | DetourError::Timeout(_) | DetourError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DetourError>;
