use slides_storage::ValidationError;

/// Everything a user action can fail with. Every variant is terminal for
/// that one action; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Backend { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("Cannot remove the last slide")]
    LastSlide,

    #[error("Nickname cannot be empty")]
    EmptyNickname,

    #[error("local storage: {0}")]
    LocalStorage(#[from] anyhow::Error),

    #[error("realtime: {0}")]
    Realtime(String),

    #[error(transparent)]
    Rejected(#[from] ValidationError),

    #[error("upload failed: {0}")]
    Upload(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Realtime(e.to_string())
    }
}
