use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedvaultError {
    #[error("Configuration error: {0}")]
    Config(String),
}
