// Media pinning: per-record screenshots pushed to a pinning service and
// referenced by gateway URL.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ArchiveError, Result};

pub const PINATA_PIN_URL: &str = "https://api.pinata.cloud/pinning/pinFileToIPFS";
pub const PINATA_GATEWAY: &str = "https://gateway.pinata.cloud/ipfs";

/// Gateway URL for a pinned content hash.
pub fn gateway_url(hash: &str) -> String {
    format!("{PINATA_GATEWAY}/{hash}")
}

#[async_trait]
pub trait MediaArchiver: Send + Sync {
    /// Pin a PNG and return its gateway URL.
    async fn archive(&self, file_name: &str, png: Vec<u8>) -> Result<String>;
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

pub struct PinataArchiver {
    client: reqwest::Client,
    jwt: String,
    pin_url: String,
}

impl PinataArchiver {
    pub fn new(jwt: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            jwt: jwt.to_string(),
            pin_url: PINATA_PIN_URL.to_string(),
        }
    }

    pub fn with_pin_url(mut self, url: &str) -> Self {
        self.pin_url = url.to_string();
        self
    }
}

#[async_trait]
impl MediaArchiver for PinataArchiver {
    async fn archive(&self, file_name: &str, png: Vec<u8>) -> Result<String> {
        if png.is_empty() {
            return Err(ArchiveError::Pinning("screenshot is empty".to_string()));
        }

        let part = Part::bytes(png)
            .file_name(file_name.to_string())
            .mime_str("image/png")
            .map_err(|e| ArchiveError::Pinning(e.to_string()))?;
        let form = Form::new().part("file", part);

        let resp = self
            .client
            .post(&self.pin_url)
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ArchiveError::Pinning(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ArchiveError::Pinning(format!("status {status}: {body}")));
        }

        let pinned: PinResponse = resp
            .json()
            .await
            .map_err(|e| ArchiveError::Pinning(format!("unreadable pin response: {e}")))?;
        debug!(hash = %pinned.ipfs_hash, file_name, "Screenshot pinned");
        Ok(gateway_url(&pinned.ipfs_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_format() {
        assert_eq!(
            gateway_url("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"),
            "https://gateway.pinata.cloud/ipfs/QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"
        );
    }

    #[test]
    fn pin_response_reads_hash() {
        let resp: PinResponse =
            serde_json::from_str(r#"{"IpfsHash":"QmHash","PinSize":10,"Timestamp":"2024-01-01"}"#)
                .unwrap();
        assert_eq!(resp.ipfs_hash, "QmHash");
    }

    #[tokio::test]
    async fn empty_screenshot_is_rejected_before_any_request() {
        let archiver = PinataArchiver::new("jwt").with_pin_url("http://127.0.0.1:9/never");
        let err = archiver.archive("shot.png", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Pinning(_)));
    }

    #[tokio::test]
    async fn unreachable_pinning_service_is_a_pinning_error() {
        let archiver = PinataArchiver::new("jwt").with_pin_url("http://127.0.0.1:9/never");
        let err = archiver.archive("shot.png", vec![0x89, b'P', b'N', b'G']).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Pinning(_)), "{err}");
    }
}
