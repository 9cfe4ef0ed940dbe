use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorachaError>;

#[derive(Debug, Error)]
pub enum StorachaError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{ability} failed: {message}")]
    Task { ability: String, message: String },

    #[error("{ability} returned an unexpected response: {body}")]
    UnexpectedResponse { ability: String, body: String },
}

impl From<reqwest::Error> for StorachaError {
    fn from(err: reqwest::Error) -> Self {
        StorachaError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for StorachaError {
    fn from(err: serde_json::Error) -> Self {
        StorachaError::Parse(err.to_string())
    }
}
