use thiserror::Error;

pub type Result<T> = std::result::Result<T, WebDriverError>;

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Stale element reference: {0}")]
    StaleElement(String),

    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("WebDriver error (status {status}, {error}): {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl WebDriverError {
    /// Errors that clear up on their own once the page settles.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WebDriverError::StaleElement(_) | WebDriverError::NoSuchElement(_)
        )
    }

    /// Map a W3C error code onto a variant.
    pub(crate) fn from_wire(status: u16, error: String, message: String) -> Self {
        match error.as_str() {
            "stale element reference" => WebDriverError::StaleElement(message),
            "no such element" => WebDriverError::NoSuchElement(message),
            _ => WebDriverError::Api {
                status,
                error,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for WebDriverError {
    fn from(err: reqwest::Error) -> Self {
        WebDriverError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for WebDriverError {
    fn from(err: serde_json::Error) -> Self {
        WebDriverError::Protocol(err.to_string())
    }
}
