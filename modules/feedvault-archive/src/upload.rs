// Idempotent upload: announce, transfer only on a new allocation, register.
//
// Announcement and registration are keyed by the bundle's CIDs, which never
// change for the same bytes. Replaying `ensure_stored` after any failure is
// therefore safe; a replay after success short-circuits on "already stored".

use std::sync::Arc;
use std::time::Duration;

use storacha_client::StoreAddOutcome;
use tracing::{info, warn};

use crate::bridge::StorageBridge;
use crate::car::PackedBundle;
use crate::error::{ArchiveError, Result};

/// Max attempts for the CAR byte transfer.
const PUT_MAX_ATTEMPTS: u32 = 3;
/// Base backoff for transfer retries. Actual delay is base * 3^attempt.
const PUT_RETRY_BASE: Duration = Duration::from_secs(2);

/// Outcome of [`Uploader::ensure_stored`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAck {
    pub root: String,
    pub car: String,
    /// False when the network already held the shard.
    pub transferred: bool,
}

pub struct Uploader {
    bridge: Arc<dyn StorageBridge>,
    max_attempts: u32,
    retry_base: Duration,
}

impl Uploader {
    pub fn new(bridge: Arc<dyn StorageBridge>) -> Self {
        Self {
            bridge,
            max_attempts: PUT_MAX_ATTEMPTS,
            retry_base: PUT_RETRY_BASE,
        }
    }

    /// Override the transfer retry schedule.
    pub fn with_retry(mut self, max_attempts: u32, retry_base: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_base = retry_base;
        self
    }

    /// Make sure the bundle is stored and registered on the network.
    pub async fn ensure_stored(&self, packed: &PackedBundle) -> Result<StoreAck> {
        let bundle = &packed.bundle;
        info!(root = %bundle.root, car = %bundle.car, size = bundle.size, "Announcing bundle");

        let transferred = match self.bridge.store_add(&bundle.car, bundle.size).await? {
            StoreAddOutcome::Upload { url, headers } => {
                info!(car = %bundle.car, "New allocation, uploading CAR");
                let mut attempt = 0;
                loop {
                    match self.bridge.put_car(&url, &headers, &packed.car).await {
                        Ok(()) => break,
                        Err(e) if attempt + 1 < self.max_attempts => {
                            let delay = self.retry_base * 3u32.pow(attempt);
                            warn!(
                                attempt = attempt + 1,
                                max_attempts = self.max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "CAR upload failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(e) => {
                            return Err(ArchiveError::UploadFailed {
                                attempts: attempt + 1,
                                message: e.to_string(),
                            });
                        }
                    }
                }
                true
            }
            StoreAddOutcome::Done => {
                info!(car = %bundle.car, "CAR already stored, skipping upload");
                false
            }
        };

        self.bridge
            .upload_add(&bundle.root, std::slice::from_ref(&bundle.car))
            .await?;
        info!(root = %bundle.root, "Bundle registered");

        Ok(StoreAck {
            root: bundle.root.clone(),
            car: bundle.car.clone(),
            transferred,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::pack;
    use crate::testing::MemoryBridge;

    fn uploader(bridge: &Arc<MemoryBridge>) -> Uploader {
        Uploader::new(bridge.clone()).with_retry(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn second_call_skips_transfer() {
        let bridge = Arc::new(MemoryBridge::new());
        let packed = pack(b"Name,Handle\nAda,@ada\n");
        let uploader = uploader(&bridge);

        let first = uploader.ensure_stored(&packed).await.unwrap();
        let second = uploader.ensure_stored(&packed).await.unwrap();

        assert!(first.transferred);
        assert!(!second.transferred);
        assert_eq!(bridge.transfers(), 1);
        assert!(bridge.is_stored(&packed.bundle.car));
    }

    #[tokio::test]
    async fn registers_shard_under_root() {
        let bridge = Arc::new(MemoryBridge::new());
        let packed = pack(b"rows");
        uploader(&bridge).ensure_stored(&packed).await.unwrap();

        assert_eq!(
            bridge.registrations(),
            vec![(packed.bundle.root.clone(), vec![packed.bundle.car.clone()])]
        );
    }

    #[tokio::test]
    async fn transient_put_failures_are_retried() {
        let bridge = Arc::new(MemoryBridge::new().failing_puts(2));
        let packed = pack(b"rows");
        let ack = uploader(&bridge).ensure_stored(&packed).await.unwrap();

        assert!(ack.transferred);
        assert_eq!(bridge.transfers(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_without_registering() {
        let bridge = Arc::new(MemoryBridge::new().failing_puts(5));
        let packed = pack(b"rows");
        let err = uploader(&bridge).ensure_stored(&packed).await.unwrap_err();

        assert!(matches!(err, ArchiveError::UploadFailed { attempts: 3, .. }));
        assert!(bridge.registrations().is_empty());

        // Replaying with the same bundle after the network recovers succeeds.
        let ack = uploader(&bridge).ensure_stored(&packed).await.unwrap();
        assert!(ack.transferred);
        assert_eq!(bridge.registrations().len(), 1);
    }
}
