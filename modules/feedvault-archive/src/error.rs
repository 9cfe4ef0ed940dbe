/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Storage bridge error: {0}")]
    Storage(#[from] storacha_client::StorachaError),

    #[error("CAR upload failed after {attempts} attempts: {message}")]
    UploadFailed { attempts: u32, message: String },

    #[error("Pinning failed: {0}")]
    Pinning(String),

    #[error("Invalid content identifier '{0}'")]
    InvalidCid(String),

    #[error("Retrieval of {cid} failed: {message}")]
    Retrieval { cid: String, message: String },
}
