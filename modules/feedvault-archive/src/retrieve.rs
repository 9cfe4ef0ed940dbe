// Retrieval by content identifier: public gateways first, each retried with
// exponential backoff, then a local IPFS node if one is installed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cid::Cid;
use tracing::{info, warn};

use crate::car::pack;
use crate::error::{ArchiveError, Result};

/// Gateway URL templates, tried in order. `{cid}` is replaced by the CID.
pub const DEFAULT_GATEWAYS: &[&str] = &[
    "https://ipfs.io/ipfs/{cid}",
    "https://{cid}.ipfs.w3s.link",
    "https://cloudflare-ipfs.com/ipfs/{cid}",
    "https://dweb.link/ipfs/{cid}",
];

const GATEWAY_ATTEMPTS: u32 = 3;
/// Delay before attempt n+1 is base * 2^n.
const GATEWAY_RETRY_BASE: Duration = Duration::from_secs(1);
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalSource {
    Gateway(String),
    LocalNode,
}

#[derive(Debug, Clone)]
pub struct Retrieved {
    pub cid: String,
    pub path: PathBuf,
    pub size: u64,
    pub source: RetrievalSource,
    /// True when repacking the bytes reproduces the requested root.
    pub verified: bool,
}

#[derive(Clone)]
pub struct Retriever {
    client: reqwest::Client,
    gateways: Vec<String>,
    max_attempts: u32,
    retry_base: Duration,
    local_node: bool,
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new()
    }
}

impl Retriever {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            gateways: DEFAULT_GATEWAYS.iter().map(|g| g.to_string()).collect(),
            max_attempts: GATEWAY_ATTEMPTS,
            retry_base: GATEWAY_RETRY_BASE,
            local_node: true,
        }
    }

    pub fn with_gateways(mut self, gateways: Vec<String>) -> Self {
        self.gateways = gateways;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_base: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_base = retry_base;
        self
    }

    /// Whether to fall back to `ipfs get` once every gateway failed.
    pub fn with_local_node(mut self, enabled: bool) -> Self {
        self.local_node = enabled;
        self
    }

    /// Fetch `cid` and write it to `dest`.
    pub async fn retrieve_to(&self, cid: &str, dest: &Path) -> Result<Retrieved> {
        let cid = parse_cid(cid)?;

        if let Some((url, bytes)) = self.fetch_from_gateways(&cid).await {
            tokio::fs::write(dest, &bytes)
                .await
                .map_err(|e| retrieval_error(&cid, format!("writing {}: {e}", dest.display())))?;
            let verified = pack(&bytes).bundle.root == cid;
            if !verified {
                warn!(cid = %cid, "Retrieved bytes do not repack to the requested root");
            }
            info!(cid = %cid, size = bytes.len(), path = %dest.display(), "Dataset retrieved");
            return Ok(Retrieved {
                cid,
                path: dest.to_path_buf(),
                size: bytes.len() as u64,
                source: RetrievalSource::Gateway(url),
                verified,
            });
        }

        if self.local_node && fetch_via_local_node(&cid, dest).await {
            let bytes = tokio::fs::read(dest)
                .await
                .map_err(|e| retrieval_error(&cid, format!("reading {}: {e}", dest.display())))?;
            let verified = pack(&bytes).bundle.root == cid;
            return Ok(Retrieved {
                cid,
                path: dest.to_path_buf(),
                size: bytes.len() as u64,
                source: RetrievalSource::LocalNode,
                verified,
            });
        }

        Err(retrieval_error(&cid, "all retrieval attempts failed".to_string()))
    }

    async fn fetch_from_gateways(&self, cid: &str) -> Option<(String, Vec<u8>)> {
        for template in &self.gateways {
            let url = template.replace("{cid}", cid);
            info!(url = %url, "Trying gateway");
            for attempt in 0..self.max_attempts {
                match self.fetch_once(&url).await {
                    Ok(bytes) => return Some((url, bytes)),
                    Err(message) => {
                        warn!(
                            url = %url,
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            error = %message,
                            "Gateway fetch failed"
                        );
                    }
                }
                if attempt + 1 < self.max_attempts {
                    tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
                }
            }
        }
        None
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let resp = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }
        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }
}

async fn fetch_via_local_node(cid: &str, dest: &Path) -> bool {
    info!(cid, "Falling back to local IPFS node");
    let status = tokio::process::Command::new("ipfs")
        .arg("get")
        .arg(cid)
        .arg("-o")
        .arg(dest)
        .status()
        .await;
    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(cid, %status, "Local ipfs get failed");
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Local ipfs CLI not found");
            false
        }
        Err(e) => {
            warn!(cid, error = %e, "Local ipfs get could not start");
            false
        }
    }
}

/// Canonical string form of `cid`, rejecting anything that is not a CID.
pub fn parse_cid(cid: &str) -> Result<String> {
    Cid::try_from(cid.trim())
        .map(|c| c.to_string())
        .map_err(|_| ArchiveError::InvalidCid(cid.to_string()))
}

fn retrieval_error(cid: &str, message: String) -> ArchiveError {
    ArchiveError::Retrieval {
        cid: cid.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CSV: &[u8] = b"Name,Handle\nAda,@ada\n";

    fn retriever(server: &MockServer) -> Retriever {
        Retriever::new()
            .with_gateways(vec![format!("{}/ipfs/{{cid}}", server.uri())])
            .with_retry(3, Duration::ZERO)
            .with_local_node(false)
    }

    #[tokio::test]
    async fn retries_gateway_until_it_answers() {
        let server = MockServer::start().await;
        let root = pack(CSV).bundle.root;
        let route = format!("/ipfs/{root}");
        Mock::given(method("GET"))
            .and(path(route.as_str()))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(route.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(CSV))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(format!("{root}.csv"));
        let retrieved = retriever(&server).retrieve_to(&root, &dest).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), CSV);
        assert_eq!(retrieved.size, CSV.len() as u64);
        assert!(retrieved.verified);
        assert!(matches!(retrieved.source, RetrievalSource::Gateway(ref url) if url.ends_with(&route)));
    }

    #[tokio::test]
    async fn every_gateway_failing_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let root = pack(CSV).bundle.root;
        let err = retriever(&server)
            .retrieve_to(&root, &dir.path().join("out.csv"))
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::Retrieval { .. }));
        assert!(!dir.path().join("out.csv").exists());
    }

    #[tokio::test]
    async fn garbage_cid_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        let err = retriever(&server)
            .retrieve_to("../../etc/passwd", Path::new("unused.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidCid(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
