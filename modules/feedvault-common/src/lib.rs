pub mod config;
pub mod error;
pub mod types;

pub use config::{BridgeCredentials, Config};
pub use error::FeedvaultError;
pub use types::*;
